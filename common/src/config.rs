use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Every configuration knob named in the external interfaces section,
/// layered the way the rest of the pack's services load settings: an
/// optional `config.toml` file, overridden by environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_address: String,
    pub db_namespace: String,
    pub db_database: String,
    pub db_username: String,
    pub db_password: String,

    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,

    pub session_ttl_minutes: i64,
    pub context_window_size: usize,

    pub audit_log_dir: String,
    pub audit_retention_days: i64,
    pub audit_anonymize_days: i64,
    pub audit_in_memory_max: usize,

    pub cb_failure_threshold: u32,
    pub cb_reset_timeout_ms: u64,

    pub embed_cache_size: usize,
    pub embed_cache_ttl_ms: u64,
    pub query_cache_size: usize,
    pub query_cache_ttl_ms: u64,
    pub patient_cache_size: usize,
    pub patient_cache_ttl_ms: u64,
    pub cache_sweep_interval_secs: u64,

    pub retriever_topk_default: usize,
    pub retriever_multihop_max: u8,
    pub retriever_relationship_boost: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_address: "mem://".into(),
            db_namespace: "clinical_qa".into(),
            db_database: "clinical_qa".into(),
            db_username: String::new(),
            db_password: String::new(),

            chunk_max_chars: 1_000,
            chunk_overlap_chars: 150,

            session_ttl_minutes: 30,
            context_window_size: 5,

            audit_log_dir: "./audit".into(),
            audit_retention_days: 90,
            audit_anonymize_days: 30,
            audit_in_memory_max: 10_000,

            cb_failure_threshold: 5,
            cb_reset_timeout_ms: 30_000,

            embed_cache_size: 1_000,
            embed_cache_ttl_ms: 300_000,
            query_cache_size: 100,
            query_cache_ttl_ms: 300_000,
            patient_cache_size: 5,
            patient_cache_ttl_ms: 1_800_000,
            cache_sweep_interval_secs: 60,

            retriever_topk_default: 10,
            retriever_multihop_max: 1,
            retriever_relationship_boost: 0.3,
        }
    }
}

impl AppConfig {
    /// Loads configuration from an optional `config.toml` in the working
    /// directory, then overlays `APP__`-prefixed environment variables,
    /// falling back to the defaults above for anything unset.
    pub fn load() -> Result<Self, AppError> {
        let defaults = Config::try_from(&AppConfig::default())?;

        let built = Config::builder()
            .add_source(defaults)
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(built.try_deserialize()?)
    }
}

impl serde::Serialize for AppConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("AppConfig", 24)?;
        s.serialize_field("db_address", &self.db_address)?;
        s.serialize_field("db_namespace", &self.db_namespace)?;
        s.serialize_field("db_database", &self.db_database)?;
        s.serialize_field("db_username", &self.db_username)?;
        s.serialize_field("db_password", &self.db_password)?;
        s.serialize_field("chunk_max_chars", &self.chunk_max_chars)?;
        s.serialize_field("chunk_overlap_chars", &self.chunk_overlap_chars)?;
        s.serialize_field("session_ttl_minutes", &self.session_ttl_minutes)?;
        s.serialize_field("context_window_size", &self.context_window_size)?;
        s.serialize_field("audit_log_dir", &self.audit_log_dir)?;
        s.serialize_field("audit_retention_days", &self.audit_retention_days)?;
        s.serialize_field("audit_anonymize_days", &self.audit_anonymize_days)?;
        s.serialize_field("audit_in_memory_max", &self.audit_in_memory_max)?;
        s.serialize_field("cb_failure_threshold", &self.cb_failure_threshold)?;
        s.serialize_field("cb_reset_timeout_ms", &self.cb_reset_timeout_ms)?;
        s.serialize_field("embed_cache_size", &self.embed_cache_size)?;
        s.serialize_field("embed_cache_ttl_ms", &self.embed_cache_ttl_ms)?;
        s.serialize_field("query_cache_size", &self.query_cache_size)?;
        s.serialize_field("query_cache_ttl_ms", &self.query_cache_ttl_ms)?;
        s.serialize_field("patient_cache_size", &self.patient_cache_size)?;
        s.serialize_field("patient_cache_ttl_ms", &self.patient_cache_ttl_ms)?;
        s.serialize_field(
            "cache_sweep_interval_secs",
            &self.cache_sweep_interval_secs,
        )?;
        s.serialize_field("retriever_topk_default", &self.retriever_topk_default)?;
        s.serialize_field("retriever_multihop_max", &self.retriever_multihop_max)?;
        s.serialize_field(
            "retriever_relationship_boost",
            &self.retriever_relationship_boost,
        )?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.chunk_max_chars, 1_000);
        assert_eq!(cfg.session_ttl_minutes, 30);
        assert_eq!(cfg.cb_failure_threshold, 5);
        assert_eq!(cfg.cb_reset_timeout_ms, 30_000);
        assert!((cfg.retriever_relationship_boost - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn load_without_config_file_falls_back_to_defaults() {
        let cfg = AppConfig::load().expect("config should load from defaults alone");
        assert_eq!(cfg.retriever_topk_default, 10);
    }
}
