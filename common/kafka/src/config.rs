use envconfig::Envconfig;

/// Process-wide broker connection settings, shared by the one producer and
/// every bucket's consumer, plus the idempotent-producer tuning and
/// bucket-topic-naming knobs the triggering core needs.
#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_BOOTSTRAP_SERVERS", default = "localhost:9092")]
    pub bootstrap_servers: String,

    #[envconfig(from = "KAFKA_TLS", default = "false")]
    pub tls: bool,

    #[envconfig(from = "KAFKA_GROUP_ID", default = "tw-tasks")]
    pub group_id: String,

    /// Unique per process; appended to `group_id` when a bucket has
    /// `trigger_same_task_in_all_nodes = true`.
    #[envconfig(from = "KAFKA_CLIENT_ID")]
    pub client_id: Option<String>,

    #[envconfig(from = "KAFKA_TOPICS_NAMESPACE")]
    pub topics_namespace: Option<String>,

    /// Comma-separated list of additional topic prefixes to subscribe
    /// aliases under.
    #[envconfig(from = "KAFKA_DATA_CENTER_PREFIXES")]
    pub data_center_prefixes: Option<String>,

    #[envconfig(from = "KAFKA_AUTO_OFFSET_RESET", default = "earliest")]
    pub auto_offset_reset: String,

    // Producer tuning.
    #[envconfig(from = "KAFKA_PRODUCER_LINGER_MS", default = "5")]
    pub producer_linger_ms: u32,
    #[envconfig(from = "KAFKA_MAX_IN_FLIGHT", default = "5")]
    pub producer_max_in_flight: u32,
    #[envconfig(from = "KAFKA_MAX_BLOCK_MS", default = "5000")]
    pub producer_max_block_ms: u32,
    #[envconfig(from = "KAFKA_REQUEST_TIMEOUT_MS", default = "5000")]
    pub producer_request_timeout_ms: u32,
    #[envconfig(from = "KAFKA_DELIVERY_TIMEOUT_MS", default = "10000")]
    pub producer_delivery_timeout_ms: u32,
    #[envconfig(from = "KAFKA_RECONNECT_BACKOFF_MS", default = "100")]
    pub producer_reconnect_backoff_ms: u32,
    #[envconfig(from = "KAFKA_RECONNECT_BACKOFF_MAX_MS", default = "5000")]
    pub producer_reconnect_backoff_max_ms: u32,
}

impl KafkaConfig {
    pub fn data_center_prefixes(&self) -> Vec<String> {
        self.data_center_prefixes
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// `[<namespace>.]twTasks.<groupId>.executeTask[.<bucketId>]`.
    pub fn trigger_topic(&self, bucket_id: Option<&str>) -> String {
        let mut topic = String::new();
        if let Some(ns) = &self.topics_namespace {
            topic.push_str(ns);
            topic.push('.');
        }
        topic.push_str("twTasks.");
        topic.push_str(&self.group_id);
        topic.push_str(".executeTask");
        if let Some(bucket_id) = bucket_id {
            topic.push('.');
            topic.push_str(bucket_id);
        }
        topic
    }

    /// Every alias this topic should also be consumed under, one per
    /// `data_center_prefixes` entry.
    pub fn trigger_topic_aliases(&self, bucket_id: Option<&str>) -> Vec<String> {
        let base = self.trigger_topic(bucket_id);
        self.data_center_prefixes()
            .into_iter()
            .map(|prefix| format!("{prefix}.{base}"))
            .collect()
    }

    /// The consumer group id to use, accounting for `trigger_same_task_in_all_nodes`:
    /// when set, every node becomes its own consumer group.
    pub fn consumer_group_id(&self, trigger_same_task_in_all_nodes: bool) -> String {
        if trigger_same_task_in_all_nodes {
            format!("{}.{}", self.group_id, self.effective_client_id())
        } else {
            self.group_id.clone()
        }
    }

    fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string())
    }
}
