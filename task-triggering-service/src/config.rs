use envconfig::Envconfig;

pub use common_kafka::config::KafkaConfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    /// Comma-separated bucket ids this node polls for. Partition count,
    /// fetch batch size, and the rest of a bucket's per-bucket knobs come
    /// from the companion `TASK_TRIGGERING_BUCKET_*` variables; this
    /// variable alone decides which buckets exist.
    #[envconfig(from = "TASK_TRIGGERING_BUCKETS", default = "default")]
    pub buckets: String,

    #[envconfig(from = "TASK_TRIGGERING_FETCH_BATCH_SIZE", default = "256")]
    pub fetch_batch_size: usize,

    #[envconfig(from = "TASK_TRIGGERING_GENERIC_MEDIUM_DELAY_MS", default = "5000")]
    pub generic_medium_delay_ms: u64,

    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3320")]
    pub bind_port: u16,
}

impl Config {
    pub fn bucket_ids(&self) -> Vec<String> {
        self.buckets
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(buckets: &str) -> Config {
        Config {
            kafka: KafkaConfig::init_from_env().unwrap(),
            buckets: buckets.to_string(),
            fetch_batch_size: 256,
            generic_medium_delay_ms: 5000,
            bind_host: "::".to_string(),
            bind_port: 3320,
        }
    }

    #[test]
    fn bucket_ids_splits_and_trims() {
        let cfg = config(" default , reports ,");
        assert_eq!(cfg.bucket_ids(), vec!["default", "reports"]);
    }

    #[test]
    fn bucket_ids_defaults_to_single_default_bucket() {
        let cfg = config("default");
        assert_eq!(cfg.bucket_ids(), vec!["default"]);
    }
}
