#![forbid(unsafe_code)]

use crate::domain::NetworkQuality;
use std::sync::atomic::{AtomicU8, Ordering};

/// Reports the current link class of a stream's viewer. Consulted on every
/// preload request.
pub trait NetworkQualitySource: Send + Sync {
    fn quality(&self, stream_task_id: u64) -> NetworkQuality;
}

impl<F> NetworkQualitySource for F
where
    F: Fn(u64) -> NetworkQuality + Send + Sync,
{
    fn quality(&self, stream_task_id: u64) -> NetworkQuality {
        self(stream_task_id)
    }
}

/// One link class for every stream, updatable from any thread.
#[derive(Debug, Default)]
pub struct SharedNetworkQuality(AtomicU8);

impl SharedNetworkQuality {
    pub fn new(quality: NetworkQuality) -> Self {
        Self(AtomicU8::new(encode(quality)))
    }

    pub fn set(&self, quality: NetworkQuality) {
        self.0.store(encode(quality), Ordering::Relaxed);
    }

    pub fn get(&self) -> NetworkQuality {
        match self.0.load(Ordering::Relaxed) {
            1 => NetworkQuality::Wide,
            2 => NetworkQuality::Medium,
            3 => NetworkQuality::Narrow,
            _ => NetworkQuality::Poor,
        }
    }
}

impl NetworkQualitySource for SharedNetworkQuality {
    fn quality(&self, _stream_task_id: u64) -> NetworkQuality {
        self.get()
    }
}

fn encode(quality: NetworkQuality) -> u8 {
    match quality {
        NetworkQuality::Poor => 0,
        NetworkQuality::Wide => 1,
        NetworkQuality::Medium => 2,
        NetworkQuality::Narrow => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_quality_defaults_to_poor_and_updates() {
        let shared = SharedNetworkQuality::default();
        assert_eq!(shared.quality(1), NetworkQuality::Poor);
        for quality in [
            NetworkQuality::Wide,
            NetworkQuality::Medium,
            NetworkQuality::Narrow,
            NetworkQuality::Poor,
        ] {
            shared.set(quality);
            assert_eq!(shared.quality(7), quality);
        }
    }

    #[test]
    fn closures_are_sources() {
        let source = |task: u64| {
            if task == 1 {
                NetworkQuality::Wide
            } else {
                NetworkQuality::Narrow
            }
        };
        assert_eq!(source.quality(1), NetworkQuality::Wide);
        assert_eq!(source.quality(2), NetworkQuality::Narrow);
    }
}
