//! Round-robin pool of transcription model instances
//!
//! The pool spreads requests across interchangeable model instances on the
//! available devices. Choosing an instance is the only globally serialized
//! step (a single atomic increment); using it is the caller's business, under
//! the instance's own mutex. Two requests that land on the same instance queue
//! on its lock, they never share it.

use crate::device::Device;
use crate::error::{ResourceError, TranscribeError};
use crate::registry::Handle;
use crate::transcribe::Transcriber;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One model instance owned by the pool
pub struct PoolInstance {
    handle: Handle<dyn Transcriber>,
    device: Device,
}

impl PoolInstance {
    pub fn new(handle: Handle<dyn Transcriber>, device: Device) -> Self {
        Self { handle, device }
    }

    /// The model, behind the lock that must be held while using it
    pub fn handle(&self) -> &Handle<dyn Transcriber> {
        &self.handle
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Pool of transcriber instances with round-robin checkout
pub struct TranscriberPool {
    instances: Vec<Arc<PoolInstance>>,
    cursor: AtomicUsize,
}

impl TranscriberPool {
    /// Build the pool
    ///
    /// The already-loaded default instance (if any) is reused as the first
    /// entry, on `Device::Auto`. Then `replicas` instances are loaded per
    /// device. Because `auto` placement lands on the first accelerator, no
    /// extra copy is loaded on `cuda:0` while the default instance exists.
    /// A device whose load fails is skipped for its remaining replicas.
    ///
    /// Fails only when no instance could be produced and there is no default
    /// instance to fall back on.
    pub fn build<F>(
        default: Option<Handle<dyn Transcriber>>,
        devices: &[Device],
        replicas: usize,
        mut load: F,
    ) -> Result<Self, ResourceError>
    where
        F: FnMut(&Device) -> Result<Box<dyn Transcriber>, TranscribeError>,
    {
        let replicas = replicas.max(1);
        let mut instances: Vec<Arc<PoolInstance>> = Vec::new();

        if let Some(ref handle) = default {
            instances.push(Arc::new(PoolInstance::new(Arc::clone(handle), Device::Auto)));
        }
        let has_default = !instances.is_empty();

        for device in devices {
            if *device == Device::Auto {
                continue;
            }
            // Assumes the default instance sits on the first accelerator.
            if *device == Device::Cuda(0) && has_default {
                tracing::debug!("Skipping {}: default instance already placed there", device);
                continue;
            }

            for replica in 0..replicas {
                tracing::info!("Loading transcriber instance on {} (replica {})", device, replica + 1);
                match load(device) {
                    Ok(model) => {
                        let handle: Handle<dyn Transcriber> = Arc::new(Mutex::new(model));
                        instances.push(Arc::new(PoolInstance::new(handle, *device)));
                    }
                    Err(e) => {
                        tracing::warn!("Skipping transcriber instance on {}: {}", device, e);
                        break;
                    }
                }
            }
        }

        if instances.is_empty() {
            let Some(handle) = default else {
                return Err(ResourceError::PoolUnavailable(
                    "failed to initialize any transcriber instance".to_string(),
                ));
            };
            instances.push(Arc::new(PoolInstance::new(handle, Device::Auto)));
        }

        let pool = Self {
            instances,
            cursor: AtomicUsize::new(0),
        };
        tracing::info!(
            "Transcriber pool ready with {} instance(s): {}",
            pool.len(),
            pool.devices()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(pool)
    }

    /// Next instance in rotation
    ///
    /// The returned instance is not locked; lock its handle around each use.
    pub fn checkout(&self) -> Arc<PoolInstance> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        Arc::clone(&self.instances[idx])
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.instances.iter().map(|i| i.device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::{TranscribeOptions, Transcription};
    use std::path::Path;

    struct Tagged(usize);

    impl Transcriber for Tagged {
        fn transcribe(
            &mut self,
            _audio: &Path,
            _options: &TranscribeOptions,
        ) -> Result<Transcription, TranscribeError> {
            Ok(Transcription::new(self.0.to_string(), "en"))
        }
    }

    fn default_handle() -> Handle<dyn Transcriber> {
        Arc::new(Mutex::new(Box::new(Tagged(0)) as Box<dyn Transcriber>))
    }

    fn tag_of(instance: &PoolInstance) -> String {
        instance
            .handle()
            .lock()
            .unwrap()
            .transcribe(Path::new("x.wav"), &TranscribeOptions::default())
            .unwrap()
            .text
    }

    #[test]
    fn test_default_reused_and_cuda0_skipped() {
        let mut loads = Vec::new();
        let mut next = 1;
        let pool = TranscriberPool::build(
            Some(default_handle()),
            &[Device::Cuda(0), Device::Cuda(1)],
            1,
            |device| {
                loads.push(*device);
                next += 1;
                Ok(Box::new(Tagged(next - 1)) as Box<dyn Transcriber>)
            },
        )
        .unwrap();

        assert_eq!(loads, vec![Device::Cuda(1)]);
        assert_eq!(pool.devices(), vec![Device::Auto, Device::Cuda(1)]);
    }

    #[test]
    fn test_replicas_per_device() {
        let pool = TranscriberPool::build(
            None,
            &[Device::Cuda(0), Device::Cuda(1)],
            2,
            |_| Ok(Box::new(Tagged(0)) as Box<dyn Transcriber>),
        )
        .unwrap();

        assert_eq!(
            pool.devices(),
            vec![Device::Cuda(0), Device::Cuda(0), Device::Cuda(1), Device::Cuda(1)]
        );
    }

    #[test]
    fn test_failed_device_skips_remaining_replicas() {
        let mut attempts = 0;
        let pool = TranscriberPool::build(
            Some(default_handle()),
            &[Device::Cuda(1), Device::Cpu],
            3,
            |device| {
                attempts += 1;
                if *device == Device::Cuda(1) {
                    Err(TranscribeError::InitFailed("out of memory".into()))
                } else {
                    Ok(Box::new(Tagged(9)) as Box<dyn Transcriber>)
                }
            },
        )
        .unwrap();

        assert_eq!(attempts, 4);
        assert_eq!(
            pool.devices(),
            vec![Device::Auto, Device::Cpu, Device::Cpu, Device::Cpu]
        );
    }

    #[test]
    fn test_all_loads_fail_without_default_is_fatal() {
        let result = TranscriberPool::build(None, &[Device::Cuda(0)], 1, |_| {
            Err(TranscribeError::InitFailed("no device".into()))
        });
        assert!(matches!(result, Err(ResourceError::PoolUnavailable(_))));
    }

    #[test]
    fn test_all_loads_fail_with_default_keeps_default() {
        let pool = TranscriberPool::build(Some(default_handle()), &[Device::Cuda(1)], 1, |_| {
            Err(TranscribeError::InitFailed("no device".into()))
        })
        .unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.devices(), vec![Device::Auto]);
    }

    #[test]
    fn test_no_devices_and_no_default_is_fatal() {
        let result = TranscriberPool::build(None, &[], 1, |_| {
            Ok(Box::new(Tagged(0)) as Box<dyn Transcriber>)
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_checkout_is_cyclic() {
        let mut next = 0;
        let pool = TranscriberPool::build(
            None,
            &[Device::Cuda(0), Device::Cuda(1), Device::Cpu],
            1,
            |_| {
                next += 1;
                Ok(Box::new(Tagged(next - 1)) as Box<dyn Transcriber>)
            },
        )
        .unwrap();

        let order: Vec<String> = (0..7).map(|_| tag_of(&pool.checkout())).collect();
        assert_eq!(order, vec!["0", "1", "2", "0", "1", "2", "0"]);
    }
}
