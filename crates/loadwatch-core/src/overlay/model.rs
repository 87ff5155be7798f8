use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::OverlayConfig;
use crate::tracker::{Classifier, DisplayState, HeuristicClassifier, LoadingSnapshot};

use super::view::{
    elapsed_label, extended_message, warning, ActionKind, OverlayAction, OverlayIcon, OverlayView,
    Progress, StatusLine,
};

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Caller-supplied side effects behind the retry / switch-source affordances.
#[derive(Clone, Default)]
pub struct OverlayActions {
    on_retry: Option<Callback>,
    on_switch_source: Option<Callback>,
}

impl OverlayActions {
    pub fn on_retry(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_switch_source(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_switch_source = Some(Arc::new(f));
        self
    }

    pub fn supports(&self, kind: ActionKind) -> bool {
        self.callback(kind).is_some()
    }

    /// Runs the callback for `kind`. Returns false when none was supplied.
    pub fn invoke(&self, kind: ActionKind) -> bool {
        match self.callback(kind) {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    fn callback(&self, kind: ActionKind) -> Option<&Callback> {
        match kind {
            ActionKind::Retry => self.on_retry.as_ref(),
            ActionKind::SwitchSource => self.on_switch_source.as_ref(),
        }
    }
}

impl fmt::Debug for OverlayActions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayActions")
            .field("on_retry", &self.on_retry.is_some())
            .field("on_switch_source", &self.on_switch_source.is_some())
            .finish()
    }
}

/// Inputs whose change restarts the reveal timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Trigger {
    state: DisplayState,
    is_responding: bool,
    segment_request_count: u32,
}

impl Trigger {
    fn of(snapshot: &LoadingSnapshot) -> Self {
        Self {
            state: snapshot.state,
            is_responding: snapshot.proxy.is_responding,
            segment_request_count: snapshot.proxy.segment_request_count,
        }
    }
}

/// Reveal flags for one continuous stretch of active loading.
///
/// Revealed flags latch until the stretch ends. The deadlines count from
/// `armed_at`, which moves whenever the trigger changes.
#[derive(Debug, Clone, Copy)]
struct Phase {
    armed_at: Instant,
    trigger: Trigger,
    extended: bool,
    smart_checked: bool,
    smart_fired: bool,
    timeout_warning: bool,
}

impl Phase {
    fn new(armed_at: Instant, trigger: Trigger) -> Self {
        Self {
            armed_at,
            trigger,
            extended: false,
            smart_checked: false,
            smart_fired: false,
            timeout_warning: false,
        }
    }

    fn rearm(&mut self, now: Instant, trigger: Trigger) {
        self.armed_at = now;
        self.trigger = trigger;
        self.smart_checked = false;
    }

    fn advance(
        &mut self,
        config: &OverlayConfig,
        classifier: &dyn Classifier,
        snapshot: &LoadingSnapshot,
        now: Instant,
    ) {
        let in_phase = now.saturating_duration_since(self.armed_at);
        let warning_delay = warning_delay(
            config,
            self.trigger.is_responding,
            self.trigger.segment_request_count,
        );

        if !self.extended && in_phase >= config.extended_message_after {
            self.extended = true;
        }
        if !self.smart_checked && in_phase >= config.smart_suggestion_after {
            self.smart_checked = true;
            let verdict = classifier.source_likely_failed(snapshot.elapsed_secs, &snapshot.proxy);
            if verdict.failed && !self.smart_fired {
                self.smart_fired = true;
                debug!(reason = %verdict.reason_text(), "Smart suggestion revealed");
            }
        }
        if !self.timeout_warning && !self.smart_fired && in_phase >= warning_delay {
            self.timeout_warning = true;
            debug!(delay_ms = warning_delay.as_millis() as u64, "Timeout warning revealed");
        }
    }
}

fn warning_delay(config: &OverlayConfig, is_responding: bool, segment_request_count: u32) -> Duration {
    if !is_responding {
        config.timeout_warning_after
    } else if segment_request_count > 0 {
        config.timeout_warning_streaming_after
    } else {
        config.timeout_warning_responding_after
    }
}

/// Stateful overlay model: tracks when the current loading phase began and
/// which supplementary messages have been revealed since.
pub struct LoadingOverlay {
    config: OverlayConfig,
    classifier: Arc<dyn Classifier>,
    actions: OverlayActions,
    phase: Option<Phase>,
}

impl LoadingOverlay {
    pub fn new(config: OverlayConfig) -> Self {
        Self::with_classifier(config, Arc::new(HeuristicClassifier::default()))
    }

    pub fn with_classifier(config: OverlayConfig, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            config,
            classifier,
            actions: OverlayActions::default(),
            phase: None,
        }
    }

    pub fn with_actions(mut self, actions: OverlayActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn actions(&self) -> &OverlayActions {
        &self.actions
    }

    /// Advances the reveal flags to `now`.
    ///
    /// Entering the active set starts a phase; leaving it drops every flag.
    /// A change of state, responsiveness or segment count restarts the
    /// deadlines, after first catching up on what was already due. The smart
    /// suggestion is consulted once per arming, and the timeout warning only
    /// latches when the suggestion did not fire.
    pub fn observe(&mut self, snapshot: &LoadingSnapshot, now: Instant) {
        if !snapshot.state.is_loading_phase() {
            if self.phase.take().is_some() {
                debug!(state = %snapshot.state, "Overlay phase ended");
            }
            return;
        }

        let trigger = Trigger::of(snapshot);
        let classifier = self.classifier.as_ref();
        let phase = self.phase.get_or_insert_with(|| Phase::new(now, trigger));
        phase.advance(&self.config, classifier, snapshot, now);
        if phase.trigger != trigger {
            phase.rearm(now, trigger);
            debug!(state = %snapshot.state, "Overlay timers restarted");
            phase.advance(&self.config, classifier, snapshot, now);
        }
    }

    /// Earliest instant at which [`observe`](Self::observe) would reveal something new.
    pub fn next_deadline(&self) -> Option<Instant> {
        let phase = self.phase.as_ref()?;
        let mut pending = Vec::with_capacity(3);
        if !phase.extended {
            pending.push(self.config.extended_message_after);
        }
        if !phase.smart_checked {
            pending.push(self.config.smart_suggestion_after);
        }
        if !phase.timeout_warning && !phase.smart_fired {
            pending.push(warning_delay(
                &self.config,
                phase.trigger.is_responding,
                phase.trigger.segment_request_count,
            ));
        }
        pending.into_iter().min().map(|d| phase.armed_at + d)
    }

    /// Builds the view for `snapshot` from the current reveal flags.
    pub fn render(&self, snapshot: &LoadingSnapshot) -> OverlayView {
        let phase = self.phase.filter(|_| snapshot.state.is_loading_phase());
        let extended = phase.is_some_and(|p| p.extended);
        let smart_fired = phase.is_some_and(|p| p.smart_fired);
        let timeout_warning = phase.is_some_and(|p| p.timeout_warning);

        // The verdict is re-read so a recovered source drops the critical styling.
        let smart = smart_fired.then(|| {
            self.classifier
                .source_likely_failed(snapshot.elapsed_secs, &snapshot.proxy)
        });
        let smart_active = smart.is_some_and(|v| v.failed);

        let extended_message = if extended {
            let hope = self
                .classifier
                .loading_hope(snapshot.elapsed_secs, &snapshot.proxy);
            extended_message(snapshot, Some(&hope))
        } else {
            None
        };

        let banner = (timeout_warning || smart_fired).then(|| warning(snapshot, smart.as_ref()));

        let mut actions = Vec::new();
        if snapshot.state.is_failure() || smart_active {
            if self.actions.supports(ActionKind::Retry) {
                actions.push(OverlayAction {
                    kind: ActionKind::Retry,
                    emphasized: false,
                });
            }
            if self.actions.supports(ActionKind::SwitchSource) {
                actions.push(OverlayAction {
                    kind: ActionKind::SwitchSource,
                    emphasized: smart_active,
                });
            }
        }

        OverlayView {
            state: snapshot.state,
            icon: OverlayIcon::for_state(snapshot.state),
            message: snapshot.message.clone(),
            elapsed_label: elapsed_label(snapshot.elapsed_secs),
            progress: Progress::for_snapshot(snapshot.state, snapshot.elapsed_secs, &snapshot.proxy),
            status: StatusLine::for_proxy(&snapshot.proxy),
            extended_message,
            warning: banner,
            actions,
        }
    }

    pub fn view(&mut self, snapshot: &LoadingSnapshot, now: Instant) -> OverlayView {
        self.observe(snapshot, now);
        self.render(snapshot)
    }

    /// Invokes the callback behind `kind` if the view currently offers it.
    pub fn trigger(&self, view: &OverlayView, kind: ActionKind) -> bool {
        view.has_action(kind) && self.actions.invoke(kind)
    }
}

impl fmt::Debug for LoadingOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingOverlay")
            .field("config", &self.config)
            .field("actions", &self.actions)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}
