use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub data_backend: String,
    pub bot_username: String,
    /// Fixed pacing delay after every platform call.
    pub pace_ms: u64,
    pub cycle_pause_ms: u64,
    pub restart_pause_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub scanner_page_size: usize,
    pub scanner_forward_pages: usize,
    pub scanner_reverse_pages: usize,
    pub scheduler_batch_base: usize,
    pub scheduler_batch_increment: usize,
    pub scheduler_max_inspected: usize,
    pub scheduler_max_writes: usize,
    pub dirty_sweep_limit: usize,
    pub merge_batch_base: usize,
    pub merge_batch_increment: usize,
    pub merge_max_records: usize,
    pub unban_request_batch: usize,
    pub deleted_cache_ttl_minutes: u64,
    pub deleted_cache_prune_minutes: u64,
    /// Inline legacy scammer list; empty disables the replay step.
    pub legacy_list: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("bot_username", "ronda_bot")?
            .set_default("pace_ms", 1_100)?
            .set_default("cycle_pause_ms", 30_000)?
            .set_default("restart_pause_ms", 120_000)?
            .set_default("retry_max_attempts", 5)?
            .set_default("retry_backoff_base_ms", 1_000)?
            .set_default("retry_backoff_max_ms", 60_000)?
            .set_default("scanner_page_size", 100)?
            .set_default("scanner_forward_pages", 3)?
            .set_default("scanner_reverse_pages", 15)?
            .set_default("scheduler_batch_base", 50)?
            .set_default("scheduler_batch_increment", 50)?
            .set_default("scheduler_max_inspected", 200)?
            .set_default("scheduler_max_writes", 5)?
            .set_default("dirty_sweep_limit", 10)?
            .set_default("merge_batch_base", 50)?
            .set_default("merge_batch_increment", 50)?
            .set_default("merge_max_records", 500)?
            .set_default("unban_request_batch", 20)?
            .set_default("deleted_cache_ttl_minutes", 30)?
            .set_default("deleted_cache_prune_minutes", 60)?
            .set_default("legacy_list", "")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}
