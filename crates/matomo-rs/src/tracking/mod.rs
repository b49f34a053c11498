//! Write-side tracking: payload construction and queued delivery.
//!
//! [`MatomoTracker`] is the entry point. Each `track_*` call builds a
//! [`TrackingPayload`] (failing immediately on a missing site id) and awaits
//! its delivery through the shared [`DispatchQueue`].
//!
//! ```ignore
//! let tracker = MatomoTracker::new(
//!     "https://stats.example.com/",
//!     TrackingDefaults::new(token).with_default_site_id(1),
//!     &DispatchConfig::default(),
//!     Arc::new(HttpTransport::new()?),
//! )?;
//! tracker.track_event(EventOptions::new("Video", "Play")).await?;
//! ```

pub mod payload;
pub mod queue;

pub use payload::{
    EventOptions, GoalOptions, PageviewOptions, TrackingDefaults, TrackingPayload, VisitContext,
};
pub use queue::{DispatchOutcome, DispatchQueue, DispatchStats, TaskState};

use crate::api::transport::Transport;
use crate::config::{ConfigError, DispatchConfig};
use crate::error::MatomoResult;
use std::sync::Arc;

/// Tracking client: shared defaults plus one dispatch queue.
#[derive(Debug, Clone)]
pub struct MatomoTracker {
    defaults: TrackingDefaults,
    queue: DispatchQueue,
}

impl MatomoTracker {
    pub fn new(
        base_url: &str,
        defaults: TrackingDefaults,
        config: &DispatchConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        if defaults.token_auth.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(Self {
            queue: DispatchQueue::new(base_url, config, transport)?,
            defaults,
        })
    }

    /// Build from an existing queue, e.g. one shared with another tracker.
    pub fn with_queue(defaults: TrackingDefaults, queue: DispatchQueue) -> Self {
        Self { defaults, queue }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn defaults(&self) -> &TrackingDefaults {
        &self.defaults
    }

    pub async fn track_pageview(&self, options: PageviewOptions) -> MatomoResult<DispatchOutcome> {
        let payload = TrackingPayload::pageview(&self.defaults, &options)?;
        self.queue.enqueue(payload).await
    }

    pub async fn track_event(&self, options: EventOptions) -> MatomoResult<DispatchOutcome> {
        let payload = TrackingPayload::event(&self.defaults, &options)?;
        self.queue.enqueue(payload).await
    }

    pub async fn track_goal(&self, options: GoalOptions) -> MatomoResult<DispatchOutcome> {
        let payload = TrackingPayload::goal(&self.defaults, &options)?;
        self.queue.enqueue(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::tests::ScriptedTransport;
    use crate::api::transport::RawResponse;
    use crate::error::ErrorKind;

    fn tracker(transport: Arc<ScriptedTransport>, site: Option<u32>) -> MatomoTracker {
        let mut defaults = TrackingDefaults::new("tok");
        defaults.default_site_id = site;
        MatomoTracker::new(
            "https://matomo.example.com/",
            defaults,
            &DispatchConfig::default(),
            transport,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn pageview_is_posted_as_form() {
        let transport = Arc::new(ScriptedTransport::replying(vec![Ok(RawResponse::new(204, ""))]));
        let tracker = tracker(transport.clone(), Some(5));

        let outcome = tracker
            .track_pageview(PageviewOptions::new("https://shop.example.com/").with_title("Home"))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 1);

        let form = transport.last_query();
        assert!(form.contains(&("idsite".to_string(), "5".to_string())));
        assert!(form.contains(&("action_name".to_string(), "Home".to_string())));
    }

    #[tokio::test]
    async fn missing_site_id_never_reaches_the_queue() {
        let transport = Arc::new(ScriptedTransport::default());
        let tracker = tracker(transport.clone(), None);

        let err = tracker.track_goal(GoalOptions::new(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredField);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn low_level_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::replying(vec![
            Err(crate::error::MatomoError::transport("connection reset")),
            Ok(RawResponse::new(200, "")),
        ]));
        let tracker = tracker(transport.clone(), Some(1));

        let outcome = tracker
            .track_event(EventOptions::new("Video", "Play"))
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = MatomoTracker::new(
            "https://matomo.example.com/",
            TrackingDefaults::new(""),
            &DispatchConfig::default(),
            Arc::new(ScriptedTransport::default()),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);
    }
}
