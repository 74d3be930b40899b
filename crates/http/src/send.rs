//! Outbound send RPC client (§6): posts one text segment per call.

use async_trait::async_trait;
use wecom_mediator_core::ApiVariant;
use wecom_mediator_core::wire::{EnterpriseSendRequest, GroupSendRequest, SendResponse, SendTextPayload};
use wecom_mediator_service::{DeliveryContext, OutboundSender};

/// Thin `reqwest` POST to the platform's outbound send RPC (§6).
///
/// `send_endpoint_base` is the URL up to but not including the `?token=`
/// query string; the token travels per-message on [`DeliveryContext`]
/// rather than being fixed at construction, since one process serves many
/// bots.
pub struct HttpOutboundSender {
    client: reqwest::Client,
    send_endpoint_base: String,
}

impl HttpOutboundSender {
    /// Builds a sender posting to `send_endpoint_base`.
    #[must_use]
    pub fn new(send_endpoint_base: String) -> Self {
        Self { client: reqwest::Client::new(), send_endpoint_base }
    }
}

#[async_trait]
impl OutboundSender for HttpOutboundSender {
    async fn send(&self, ctx: &DeliveryContext, text: &str) -> Result<(), String> {
        let url = format!("{}?token={}", self.send_endpoint_base.trim_end_matches('/'), ctx.token);
        let payload = SendTextPayload { text: text.to_owned() };

        let request = match ctx.api_variant {
            ApiVariant::Enterprise => {
                let body = EnterpriseSendRequest {
                    im_bot_id: ctx.bot_id.clone(),
                    im_contact_id: ctx.room_id.is_none().then(|| ctx.contact_id.clone()),
                    im_room_id: ctx.room_id.clone(),
                    message_type: 7,
                    payload,
                };
                self.client.post(&url).json(&body)
            },
            ApiVariant::Group => {
                let body = GroupSendRequest {
                    bot_wxid: ctx.bot_id.clone(),
                    contact_id: ctx.room_id.is_none().then(|| ctx.contact_id.clone()),
                    room_id: ctx.room_id.clone(),
                    message_type: 7,
                    payload,
                };
                self.client.post(&url).json(&body)
            },
            // ApiVariant is `#[non_exhaustive]` downstream of its defining
            // crate; no third variant exists today.
            _ => return Err(format!("unsupported api variant: {:?}", ctx.api_variant)),
        };

        let response = request.send().await.map_err(|err| err.to_string())?;
        let status = response.status();
        let body = response.text().await.map_err(|err| err.to_string())?;
        if !status.is_success() {
            return Err(format!("send rpc returned http {status}: {body}"));
        }

        let parsed: SendResponse = serde_json::from_str(&body).map_err(|err| err.to_string())?;
        if parsed.is_success() {
            Ok(())
        } else {
            Err(format!("send rpc error {}: {}", parsed.errcode, parsed.errmsg))
        }
    }
}
