//! Outbound Message Dispatch
//!
//! Translates a send request into one or more protocol-level sends with a
//! defined degrade order:
//!
//! 1. First image goes out with the text body as its caption and becomes
//!    the primary send.
//! 2. If that fails, a plain text send becomes the primary instead.
//! 3. Remaining images are best-effort: a failure is logged and skipped,
//!    never aborts the batch.
//!
//! Every successful send's id is collected in send order. The dispatch
//! only fails as a whole when no send at all succeeded.

use super::traits::{Jid, MessageId, OutboundPayload, WaError, WaResult, WaSession};
use tracing::{debug, warn};

/// One media attachment: binary payload plus MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl MediaItem {
    pub fn new(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Outbound send request.
///
/// At least one of `text` or `images` must be non-empty. Video items are
/// accepted for interface parity but are not dispatched.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Raw or network-formatted destination address.
    pub destination: String,
    pub text: String,
    /// Ordered image sequence; the first one carries the caption.
    pub images: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
}

impl SendRequest {
    pub fn text(destination: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<MediaItem>) -> Self {
        self.images = images;
        self
    }
}

/// Result of a successful dispatch.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SendReceipt {
    /// Identifier of the primary send (first image, or the text fallback).
    pub primary_id: MessageId,
    /// Identifiers of every successful send, in send order.
    pub message_ids: Vec<MessageId>,
}

/// Normalize a destination into a network address.
///
/// Addresses already carrying a domain pass through. Bare identifiers get
/// the group suffix when they contain a hyphen, the individual-contact
/// suffix otherwise.
pub fn normalize_destination(destination: &str) -> WaResult<Jid> {
    if destination.is_empty() {
        return Err(WaError::InvalidDestination);
    }
    if destination.contains('@') {
        return Ok(Jid(destination.to_string()));
    }
    if destination.contains('-') {
        Ok(Jid(format!("{destination}@g.us")))
    } else {
        Ok(Jid(format!("{destination}@s.whatsapp.net")))
    }
}

/// Dispatch a request through the given live session.
///
/// Preconditions (empty message, invalid destination) are rejected before
/// any network call.
pub async fn dispatch<S>(session: &S, request: &SendRequest) -> WaResult<SendReceipt>
where
    S: WaSession + ?Sized,
{
    if request.text.is_empty() && request.images.is_empty() {
        return Err(WaError::EmptyMessage);
    }
    let destination = normalize_destination(&request.destination)?;

    if !request.videos.is_empty() {
        debug!(
            count = request.videos.len(),
            "video items are not dispatched; skipping"
        );
    }

    let mut primary: Option<MessageId> = None;
    let mut message_ids = Vec::new();
    let mut last_error: Option<WaError> = None;

    if let Some(first) = request.images.first() {
        let payload = OutboundPayload::Image {
            data: first.data.clone(),
            mime_type: first.mime_type.clone(),
            caption: Some(request.text.clone()),
        };
        match session.send(&destination, payload).await {
            Ok(id) => {
                primary = Some(id.clone());
                message_ids.push(id);
            }
            Err(e) => {
                warn!(error = %e, "primary image send failed; falling back to text");
                let fallback = OutboundPayload::Text {
                    body: request.text.clone(),
                };
                match session.send(&destination, fallback).await {
                    Ok(id) => {
                        primary = Some(id.clone());
                        message_ids.push(id);
                    }
                    Err(e) => {
                        warn!(error = %e, "text fallback failed");
                        last_error = Some(e);
                    }
                }
            }
        }

        for item in request.images.iter().skip(1) {
            let payload = OutboundPayload::Image {
                data: item.data.clone(),
                mime_type: item.mime_type.clone(),
                caption: None,
            };
            match session.send(&destination, payload).await {
                Ok(id) => message_ids.push(id),
                Err(e) => warn!(error = %e, "secondary image send failed; skipping"),
            }
        }
    } else {
        let payload = OutboundPayload::Text {
            body: request.text.clone(),
        };
        match session.send(&destination, payload).await {
            Ok(id) => {
                primary = Some(id.clone());
                message_ids.push(id);
            }
            Err(e) => last_error = Some(e),
        }
    }

    match primary {
        Some(primary_id) => Ok(SendReceipt {
            primary_id,
            message_ids,
        }),
        None => {
            let reason = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no send succeeded".to_string());
            Err(WaError::SendFailed(reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wa::mock::MockSession;
    use proptest::prelude::*;

    fn image(byte: u8) -> MediaItem {
        MediaItem::new(vec![byte; 4], "image/jpeg")
    }

    #[test]
    fn normalize_appends_individual_suffix() {
        let jid = normalize_destination("5511999999999").unwrap();
        assert_eq!(jid.0, "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn normalize_appends_group_suffix_for_hyphenated() {
        let jid = normalize_destination("123-456").unwrap();
        assert_eq!(jid.0, "123-456@g.us");
    }

    #[test]
    fn normalize_passes_through_full_addresses() {
        let jid = normalize_destination("5511999999999@s.whatsapp.net").unwrap();
        assert_eq!(jid.0, "5511999999999@s.whatsapp.net");
    }

    #[test]
    fn normalize_rejects_empty_destination() {
        assert!(matches!(
            normalize_destination(""),
            Err(WaError::InvalidDestination)
        ));
    }

    #[tokio::test]
    async fn text_only_send() {
        let session = MockSession::new();
        let request = SendRequest::text("5511999999999", "hi");

        let receipt = dispatch(&session, &request).await.unwrap();

        assert_eq!(receipt.message_ids, vec![receipt.primary_id.clone()]);
        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0 .0, "5511999999999@s.whatsapp.net");
        assert_eq!(
            sent[0].1,
            OutboundPayload::Text {
                body: "hi".to_string()
            }
        );
    }

    #[tokio::test]
    async fn first_image_carries_caption_and_is_primary() {
        let session = MockSession::new();
        let request =
            SendRequest::text("5511999999999", "hi").with_images(vec![image(1), image(2)]);

        let receipt = dispatch(&session, &request).await.unwrap();

        let sent = session.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[0].1,
            OutboundPayload::Image { caption: Some(c), .. } if c == "hi"
        ));
        assert!(matches!(
            &sent[1].1,
            OutboundPayload::Image { caption: None, .. }
        ));
        assert_eq!(receipt.primary_id, receipt.message_ids[0]);
        assert_eq!(receipt.message_ids.len(), 2);
    }

    #[tokio::test]
    async fn first_image_failure_falls_back_to_text_then_remaining_images() {
        let session = MockSession::new();
        session.fail_next_send("media upload rejected");
        let request =
            SendRequest::text("5511999999999", "hi").with_images(vec![image(1), image(2)]);

        let receipt = dispatch(&session, &request).await.unwrap();

        // Attempts: failed image, text fallback, second image.
        let sent = session.sent();
        assert_eq!(sent.len(), 3);
        assert!(matches!(&sent[1].1, OutboundPayload::Text { body } if body == "hi"));
        assert!(matches!(
            &sent[2].1,
            OutboundPayload::Image { caption: None, .. }
        ));

        // Primary is the text fallback; ids are [text, img2].
        assert_eq!(receipt.message_ids.len(), 2);
        assert_eq!(receipt.primary_id, receipt.message_ids[0]);
    }

    #[tokio::test]
    async fn secondary_image_failure_is_skipped_not_fatal() {
        let session = MockSession::new();
        session.push_send_ok("MSG-A");
        session.fail_next_send("secondary upload rejected");
        session.push_send_ok("MSG-C");
        let request = SendRequest::text("5511999999999", "hi")
            .with_images(vec![image(1), image(2), image(3)]);

        let receipt = dispatch(&session, &request).await.unwrap();

        assert_eq!(receipt.primary_id, MessageId("MSG-A".to_string()));
        assert_eq!(
            receipt.message_ids,
            vec![
                MessageId("MSG-A".to_string()),
                MessageId("MSG-C".to_string())
            ]
        );
        assert_eq!(session.sent().len(), 3);
    }

    #[tokio::test]
    async fn empty_request_rejected_before_any_network_call() {
        let session = MockSession::new();
        let request = SendRequest::text("5511999999999", "");

        let result = dispatch(&session, &request).await;

        assert!(matches!(result, Err(WaError::EmptyMessage)));
        assert!(session.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_destination_rejected_before_any_network_call() {
        let session = MockSession::new();
        let request = SendRequest::text("", "hi");

        let result = dispatch(&session, &request).await;

        assert!(matches!(result, Err(WaError::InvalidDestination)));
        assert!(session.sent().is_empty());
    }

    #[tokio::test]
    async fn all_attempts_failing_reports_send_failed() {
        let session = MockSession::new();
        session.fail_next_send("image rejected");
        session.fail_next_send("text rejected");
        let request = SendRequest::text("5511999999999", "hi").with_images(vec![image(1)]);

        let result = dispatch(&session, &request).await;

        match result {
            Err(WaError::SendFailed(reason)) => assert!(reason.contains("text rejected")),
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn text_only_failure_reports_send_failed() {
        let session = MockSession::new();
        session.fail_next_send("server unavailable");
        let request = SendRequest::text("5511999999999", "hi");

        let result = dispatch(&session, &request).await;
        assert!(matches!(result, Err(WaError::SendFailed(_))));
    }

    #[tokio::test]
    async fn videos_are_accepted_but_not_sent() {
        let session = MockSession::new();
        let mut request = SendRequest::text("5511999999999", "hi");
        request.videos = vec![MediaItem::new(vec![9; 4], "video/mp4")];

        dispatch(&session, &request).await.unwrap();

        let sent = session.sent();
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0].1, OutboundPayload::Text { .. }));
    }

    proptest! {
        #[test]
        fn normalize_never_double_suffixes(dest in "[0-9-]{1,20}") {
            let jid = normalize_destination(&dest).unwrap();
            prop_assert_eq!(jid.0.matches('@').count(), 1);
            if dest.contains('-') {
                prop_assert!(jid.0.ends_with("@g.us"));
            } else {
                prop_assert!(jid.0.ends_with("@s.whatsapp.net"));
            }
        }

        #[test]
        fn normalize_preserves_addresses_with_domain(dest in "[0-9]{5,15}@[a-z.]{2,12}") {
            let jid = normalize_destination(&dest).unwrap();
            prop_assert_eq!(jid.0, dest);
        }
    }
}
