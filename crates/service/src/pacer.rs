//! Delivery pacer (§4.H): reply segmentation and typing-paced sending.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::watch;
use tracing::warn;
use wecom_mediator_core::{ApiVariant, MonitoringEvent, MonitoringSink, RuntimeConfig};

fn blank_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{2,}").expect("valid regex"))
}

fn is_chinese(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

fn is_emoji(c: char) -> bool {
    matches!(
        c,
        '\u{1F300}'..='\u{1FAFF}' | '\u{2600}'..='\u{27BF}' | '\u{2B00}'..='\u{2BFF}' | '\u{1F1E6}'..='\u{1F1FF}'
    )
}

/// Splits `text` right after any char satisfying `is_boundary` when it is
/// immediately followed by a Chinese character, keeping the boundary char
/// on the left segment (§4.H steps 3-4).
fn split_keeping_left(text: &str, is_boundary: impl Fn(char) -> bool) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        current.push(c);
        if is_boundary(c) && chars.get(i + 1).is_some_and(|&next| is_chinese(next)) {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Segments a reply into a non-empty list of trimmed, non-empty pieces
/// (§4.H steps 1-6).
#[must_use]
pub fn segment(reply_text: &str) -> Vec<String> {
    let mut pieces: Vec<String> = blank_line_re().split(reply_text).map(str::to_owned).collect();
    pieces = pieces.into_iter().flat_map(|p| p.split('～').map(str::to_owned).collect::<Vec<_>>()).collect();
    pieces = pieces.into_iter().flat_map(|p| split_keeping_left(&p, |c| c == '？' || c == '。')).collect();
    pieces = pieces.into_iter().flat_map(|p| split_keeping_left(&p, is_emoji)).collect();
    pieces
        .into_iter()
        .map(|p| p.replace('*', "").trim().to_owned())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Everything the pacer needs to address a send to the right wire shape (§6).
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Which outbound send RPC shape to use.
    pub api_variant: ApiVariant,
    /// Bot instance id.
    pub bot_id: String,
    /// Contact id (private chat target).
    pub contact_id: String,
    /// Room id (group chat target), if applicable.
    pub room_id: Option<String>,
    /// Webhook auth token, threaded through to the send RPC.
    pub token: String,
    /// The message id driving this delivery, for monitoring.
    pub message_id: String,
}

/// Sends one text segment to the outbound send RPC (§6). Implemented in
/// `wecom-mediator-http` so this crate carries no HTTP client dependency.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Sends `text` per `ctx`. Returns an error description on failure;
    /// the pacer counts but does not propagate per-segment failures.
    async fn send(&self, ctx: &DeliveryContext, text: &str) -> Result<(), String>;
}

/// Outcome of one [`DeliveryPacer::deliver`] call.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    /// `true` iff at least one segment was sent successfully and none failed... actually
    /// `false` iff any segment failed (§4.H: "If one or more segments fail, the overall
    /// result is success=false").
    pub success: bool,
    /// Total segments attempted.
    pub segment_count: usize,
    /// Segments that failed to send.
    pub failed_segments: usize,
    /// Wall-clock time the whole delivery took, milliseconds.
    pub total_time_ms: u64,
}

/// Segments a reply and sends it with typing-like pacing between pieces (§4.H).
pub struct DeliveryPacer {
    sender: Arc<dyn OutboundSender>,
    monitoring: Arc<dyn MonitoringSink>,
    runtime_config: watch::Receiver<RuntimeConfig>,
}

impl DeliveryPacer {
    /// Builds a pacer over the given sender, monitoring sink, and
    /// hot-reloadable runtime config.
    #[must_use]
    pub fn new(
        sender: Arc<dyn OutboundSender>,
        monitoring: Arc<dyn MonitoringSink>,
        runtime_config: watch::Receiver<RuntimeConfig>,
    ) -> Self {
        Self { sender, monitoring, runtime_config }
    }

    /// Computes the pacing delay before sending segment `index` of `len`
    /// chars (§4.H pacing rules). Index 0 always has zero delay.
    fn delay_for(&self, index: usize, segment_len: usize) -> std::time::Duration {
        if index == 0 {
            return std::time::Duration::ZERO;
        }
        let config = self.runtime_config.borrow();
        let base = (segment_len as u64) * config.typing_delay_per_char_ms + config.paragraph_gap_ms;
        let clamped = base.clamp(config.typing_min_delay_ms, config.typing_max_delay_ms);
        let variation = config.typing_random_variation;
        let jittered = if variation > 0.0 {
            let factor = rand::thread_rng().gen_range((1.0 - variation)..=(1.0 + variation));
            ((clamped as f64) * factor).round() as u64
        } else {
            clamped
        };
        std::time::Duration::from_millis(jittered)
    }

    /// Segments `reply_text` and sends each piece with a pacing delay,
    /// emitting `send_start`/`send_end` around the whole delivery (§4.H).
    pub async fn deliver(&self, reply_text: &str, ctx: &DeliveryContext) -> DeliveryResult {
        let started = std::time::Instant::now();
        self.monitoring.record(MonitoringEvent::SendStart { message_id: ctx.message_id.clone() }).await;

        let segments = segment(reply_text);
        let segment_count = segments.len();
        let mut failed_segments = 0;

        for (index, piece) in segments.iter().enumerate() {
            let delay = self.delay_for(index, piece.chars().count());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Err(reason) = self.sender.send(ctx, piece).await {
                warn!(message_id = %ctx.message_id, segment = index, %reason, "segment send failed");
                failed_segments += 1;
            }
        }

        self.monitoring.record(MonitoringEvent::SendEnd { message_id: ctx.message_id.clone() }).await;

        DeliveryResult {
            success: failed_segments == 0,
            segment_count,
            failed_segments,
            total_time_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::segment;

    #[test]
    fn single_sentence_without_markers_is_one_segment() {
        let segments = segment("这是一句完整的话，没有特殊符号");
        assert_eq!(segments, vec!["这是一句完整的话，没有特殊符号".to_owned()]);
    }

    #[test]
    fn splits_on_blank_line_boundaries() {
        let segments = segment("第一段\n\n第二段");
        assert_eq!(segments, vec!["第一段".to_owned(), "第二段".to_owned()]);
    }

    #[test]
    fn splits_on_wave_dash_and_drops_it() {
        let segments = segment("你好呀～在吗");
        assert_eq!(segments, vec!["你好呀".to_owned(), "在吗".to_owned()]);
    }

    #[test]
    fn splits_after_question_mark_before_chinese_char() {
        let segments = segment("在吗？我想问一下");
        assert_eq!(segments, vec!["在吗？".to_owned(), "我想问一下".to_owned()]);
    }

    #[test]
    fn does_not_split_period_before_latin_text() {
        let segments = segment("version 1.0 is out");
        assert_eq!(segments, vec!["version 1.0 is out".to_owned()]);
    }

    #[test]
    fn strips_asterisks_everywhere() {
        let segments = segment("**加粗**的文字");
        assert_eq!(segments, vec!["加粗的文字".to_owned()]);
    }

    #[test]
    fn drops_empty_segments() {
        let segments = segment("前面～～后面");
        assert_eq!(segments, vec!["前面".to_owned(), "后面".to_owned()]);
    }
}
