//! Configuration access port.

pub trait ConfigPort {
    /// Raw value of `key` in `[section]`, if present.
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Non-empty trimmed value, or `None`.
    fn get_nonempty(&self, section: &str, key: &str) -> Option<String> {
        self.get_string(section, key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
