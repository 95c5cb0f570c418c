use super::Config;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("PRLENS_API_KEY").or_else(|_| std::env::var("API_KEY"))
            && !key.is_empty()
        {
            self.classifier.api_key = Some(key);
        }

        if let Ok(base_url) = std::env::var("PRLENS_BASE_URL")
            && !base_url.is_empty()
        {
            self.classifier.base_url = base_url;
        }

        if let Ok(model) = std::env::var("PRLENS_MODEL")
            && !model.is_empty()
        {
            self.classifier.model = model;
        }

        if let Ok(raw) = std::env::var("PRLENS_MAX_CONCURRENCY")
            && let Ok(value) = raw.parse::<usize>()
            && value > 0
        {
            self.batch.max_concurrency = value;
        }

        if let Ok(dir) = std::env::var("PRLENS_CHECKPOINT_DIR")
            && !dir.is_empty()
        {
            self.checkpoints.dir = dir;
        }
    }
}
