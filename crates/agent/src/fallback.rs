//! Fallback message provider (§4.G "Fallback message provider").

use rand::seq::SliceRandom;

/// Default pool of short Chinese phrases meaning "let me check and get back to you."
///
/// Used whenever the Agent errors out or signals degraded mode (S4), so
/// the user always receives a human-feeling reply instead of silence or
/// a raw error.
const DEFAULT_PHRASES: &[&str] = &[
    "我确认下哈，马上回你~",
    "稍等一下，我看看啊~",
    "这个我确认下再回复你~",
    "好的，我这边核实一下~",
];

/// Returns a fallback reply, independent of any Agent call.
///
/// If `configured` carries an override string, it is returned verbatim;
/// otherwise a phrase is picked at random from [`DEFAULT_PHRASES`].
#[derive(Debug, Clone, Default)]
pub struct FallbackProvider {
    configured: Option<String>,
}

impl FallbackProvider {
    /// Creates a provider with an optional configured override.
    #[must_use]
    pub fn new(configured: Option<String>) -> Self {
        Self { configured }
    }

    /// Picks a fallback reply.
    #[must_use]
    pub fn pick(&self) -> String {
        if let Some(configured) = &self.configured {
            return configured.clone();
        }
        DEFAULT_PHRASES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(DEFAULT_PHRASES[0])
            .to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::FallbackProvider;

    #[test]
    fn uses_configured_override_when_present() {
        let provider = FallbackProvider::new(Some("custom fallback".to_owned()));
        assert_eq!(provider.pick(), "custom fallback");
    }

    #[test]
    fn picks_from_default_pool_when_unconfigured() {
        let provider = FallbackProvider::new(None);
        let phrase = provider.pick();
        assert!(!phrase.is_empty());
    }
}
