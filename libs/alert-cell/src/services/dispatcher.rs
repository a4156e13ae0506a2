use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_models::{Channel, PatientContact};

use crate::channels::ChannelAdapter;
use crate::error::{ChannelError, DispatchError};
use crate::models::{
    Alert, AlertFilter, AlertKind, AlertPriority, AlertRequest, AlertStatistics, AlertStatus, DispatchStatus,
    NotificationTask, TaskStatus,
};
use crate::policy::DispatchPolicy;
use crate::routing::RoutingTable;
use crate::services::clock::{to_chrono, DispatchClock};
use crate::services::ledger::{AlertLedger, Recorded, TaskUpdate};
use crate::templates::MessageTemplates;

#[derive(Debug, Clone, Copy)]
struct TaskJob {
    task_id: Uuid,
}

struct Receivers {
    intake: mpsc::UnboundedReceiver<Uuid>,
    queues: Vec<(Channel, mpsc::UnboundedReceiver<TaskJob>)>,
}

struct Shared {
    ledger: Arc<AlertLedger>,
    policy: DispatchPolicy,
    routing: RoutingTable,
    templates: MessageTemplates,
    clock: DispatchClock,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    intake: mpsc::UnboundedSender<Uuid>,
    queues: HashMap<Channel, mpsc::UnboundedSender<TaskJob>>,
    shutdown: watch::Sender<bool>,
}

/// Fans alerts out into per-channel notification tasks and drives their retries.
///
/// `raise` only records the alert and queues it; a single coordinator expands
/// alerts in raise order and one sequential worker per channel delivers them.
pub struct AlertDispatcher {
    shared: Arc<Shared>,
    receivers: Mutex<Option<Receivers>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertDispatcher {
    pub fn new(
        policy: DispatchPolicy,
        routing: RoutingTable,
        templates: MessageTemplates,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
    ) -> Self {
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let mut queues = HashMap::new();
        let mut queue_receivers = Vec::new();
        for channel in Channel::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            queues.insert(channel, tx);
            queue_receivers.push((channel, rx));
        }

        let mut by_channel: HashMap<Channel, Arc<dyn ChannelAdapter>> = HashMap::new();
        for adapter in adapters {
            if by_channel.insert(adapter.channel(), Arc::clone(&adapter)).is_some() {
                warn!("Replacing earlier adapter for channel {}", adapter.channel());
            }
        }

        let shared = Shared {
            ledger: Arc::new(AlertLedger::new()),
            policy,
            routing,
            templates,
            clock: DispatchClock::new(),
            adapters: by_channel,
            intake: intake_tx,
            queues,
            shutdown,
        };

        Self {
            shared: Arc::new(shared),
            receivers: Mutex::new(Some(Receivers {
                intake: intake_rx,
                queues: queue_receivers,
            })),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn ledger(&self) -> Arc<AlertLedger> {
        Arc::clone(&self.shared.ledger)
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.shared.policy
    }

    pub fn clock(&self) -> DispatchClock {
        self.shared.clock
    }

    /// Spawn the coordinator and one worker per channel.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), DispatchError> {
        let receivers = self
            .receivers
            .lock()
            .await
            .take()
            .ok_or(DispatchError::AlreadyStarted)?;

        let mut handles = self.handles.lock().await;

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shared.shutdown.subscribe();
        handles.push(tokio::spawn(run_coordinator(shared, receivers.intake, shutdown)));

        for (channel, queue) in receivers.queues {
            let shared = Arc::clone(&self.shared);
            let shutdown = self.shared.shutdown.subscribe();
            handles.push(tokio::spawn(run_worker(shared, channel, queue, shutdown)));
        }

        info!(
            "Alert dispatcher started with adapters for {:?}",
            self.shared.adapters.keys().collect::<BTreeSet<_>>()
        );
        Ok(())
    }

    /// Stop the coordinator, workers and pending retry timers.
    pub async fn shutdown(&self) {
        info!("Initiating alert dispatcher shutdown");
        self.shared.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Dispatcher task ended abnormally: {}", e);
            }
        }
        info!("Alert dispatcher shutdown complete");
    }

    /// Record and queue an alert. Returns without waiting for delivery.
    #[instrument(skip(self, request), fields(kind = ?request.kind, priority = ?request.priority))]
    pub async fn raise(&self, request: AlertRequest) -> Result<Uuid, DispatchError> {
        if request.payload.message.is_none() && request.payload.fields.is_empty() {
            return Err(DispatchError::InvalidAlert("Alert payload is empty".to_string()));
        }

        let now = self.shared.clock.now();
        let alert = Alert::from_request(request, now, now + to_chrono(self.shared.policy.deadline));
        self.shared.submit(alert).await
    }

    pub async fn get_dispatch_status(&self, alert_id: Uuid) -> Result<DispatchStatus, DispatchError> {
        self.shared.ledger.get_dispatch_status(alert_id).await
    }

    pub async fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.shared.ledger.list_alerts(filter).await
    }

    pub async fn statistics(&self) -> AlertStatistics {
        self.shared.ledger.statistics().await
    }

    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        acknowledged_by: impl Into<String>,
        note: Option<String>,
    ) -> Result<Alert, DispatchError> {
        let now = self.shared.clock.now();
        self.shared.ledger.acknowledge(alert_id, acknowledged_by, note, now).await
    }

    pub async fn wait_for_terminal(&self, alert_id: Uuid) -> Result<DispatchStatus, DispatchError> {
        self.shared.ledger.wait_for_terminal(alert_id).await
    }
}

async fn run_coordinator(
    shared: Arc<Shared>,
    mut intake: mpsc::UnboundedReceiver<Uuid>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Alert coordinator started");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = intake.recv() => match next {
                Some(alert_id) => shared.expand(alert_id).await,
                None => break,
            },
        }
    }
    debug!("Alert coordinator stopped");
}

async fn run_worker(
    shared: Arc<Shared>,
    channel: Channel,
    mut queue: mpsc::UnboundedReceiver<TaskJob>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Channel worker started: {}", channel);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            next = queue.recv() => match next {
                Some(job) => shared.attempt(job).await,
                None => break,
            },
        }
    }
    debug!("Channel worker stopped: {}", channel);
}

impl Shared {
    async fn submit(&self, alert: Alert) -> Result<Uuid, DispatchError> {
        if *self.shutdown.borrow() {
            return Err(DispatchError::ShutDown);
        }

        let dedup_window = to_chrono(self.policy.dedup_window);
        match self.ledger.record(alert, dedup_window).await {
            Recorded::New(alert_id) => {
                self.intake.send(alert_id).map_err(|_| DispatchError::ShutDown)?;
                debug!(alert_id = %alert_id, "Alert queued");
                Ok(alert_id)
            }
            Recorded::Merged(alert_id) => Ok(alert_id),
        }
    }

    /// One task per channel per recipient with an address on that channel.
    async fn expand(&self, alert_id: Uuid) {
        let Some(alert) = self.ledger.get_alert(alert_id).await else {
            warn!(alert_id = %alert_id, "Queued alert missing from ledger");
            return;
        };

        let channels = alert
            .channels
            .clone()
            .unwrap_or_else(|| self.routing.channels_for(alert.kind, alert.priority));

        let mut tasks = Vec::new();
        for channel in channels {
            for recipient in &alert.recipients {
                match recipient.address_for(channel) {
                    Some(address) => tasks.push(NotificationTask::new(alert_id, channel, address)),
                    None => warn!(
                        alert_id = %alert_id,
                        "Recipient {} has no {} address, skipping",
                        recipient.name,
                        channel
                    ),
                }
            }
        }

        let now = self.clock.now();
        if tasks.is_empty() {
            // Recipients that no routed channel can reach mean nothing was sent
            let status = if alert.recipients.is_empty() {
                AlertStatus::Delivered
            } else {
                AlertStatus::Failed
            };
            warn!(alert_id = %alert_id, status = ?status, "Alert has no deliverable tasks, finalizing");
            self.ledger.finalize_empty(alert_id, status, now).await;
            return;
        }

        let jobs: Vec<(Channel, TaskJob)> = tasks
            .iter()
            .map(|task| (task.channel, TaskJob { task_id: task.id }))
            .collect();
        self.ledger.attach_tasks(alert_id, tasks, now).await;

        for (channel, job) in jobs {
            if let Some(queue) = self.queues.get(&channel) {
                if queue.send(job).is_err() {
                    warn!(alert_id = %alert_id, "Channel queue closed: {}", channel);
                }
            }
        }
        debug!(alert_id = %alert_id, "Expanded alert into tasks");
    }

    async fn attempt(self: &Arc<Self>, job: TaskJob) {
        let Some((task, alert)) = self.ledger.task_with_alert(job.task_id).await else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }

        let now = self.clock.now();
        if now >= alert.deadline_at {
            let error = ChannelError::DispatchTimeout.to_string();
            self.finish(task.id, TaskStatus::Abandoned, Some(error), None).await;
            return;
        }

        let Some(adapter) = self.adapters.get(&task.channel).cloned() else {
            self.finish(
                task.id,
                TaskStatus::Failed,
                Some(format!("No adapter registered for channel {}", task.channel)),
                None,
            )
            .await;
            return;
        };

        let Some(attempts) = self.ledger.begin_attempt(task.id, now).await else {
            return;
        };

        let contact = alert
            .recipients
            .iter()
            .find(|recipient| recipient.address_for(task.channel) == Some(task.recipient.as_str()))
            .cloned()
            .unwrap_or_else(|| PatientContact::new(task.recipient.clone()));
        let message = self.templates.render(&alert, &contact);

        let limit = self.policy.channel_timeout;
        let result = match timeout(limit, adapter.send(&task.recipient, &message)).await {
            Ok(outcome) => outcome.into_result(),
            Err(_) => Err(ChannelError::Timeout(limit)),
        };

        match result {
            Ok(()) => self.finish(task.id, TaskStatus::Delivered, None, None).await,
            Err(e) if e.is_retriable() && self.policy.has_attempts_left(attempts) => {
                let retry_at = self.clock.now() + to_chrono(self.policy.backoff_after(attempts));
                debug!(
                    task_id = %task.id,
                    "Attempt {} on {} failed: {}; retrying at {}",
                    attempts, task.channel, e, retry_at
                );
                self.finish(task.id, TaskStatus::Pending, Some(e.to_string()), Some(retry_at))
                    .await;
                self.schedule_retry(job, task.channel, retry_at.min(alert.deadline_at));
            }
            Err(e) => self.finish(task.id, TaskStatus::Failed, Some(e.to_string()), None).await,
        }
    }

    fn schedule_retry(self: &Arc<Self>, job: TaskJob, channel: Channel, wake_at: chrono::DateTime<chrono::Utc>) {
        let shared = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let wake = self.clock.instant_at(wake_at);

        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(wake) => {
                    if let Some(queue) = shared.queues.get(&channel) {
                        let _ = queue.send(job);
                    }
                }
                _ = shutdown.changed() => {}
            }
        });
    }

    async fn finish(
        self: &Arc<Self>,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<String>,
        retry_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        let now = self.clock.now();
        let Some(update) = self.ledger.complete_task(task_id, status, error, retry_at, now).await else {
            return;
        };

        match status {
            TaskStatus::Delivered => info!(task_id = %task_id, alert_id = %update.alert.id, "Notification delivered"),
            TaskStatus::Failed | TaskStatus::Abandoned => {
                warn!(task_id = %task_id, alert_id = %update.alert.id, "Notification {:?}", status)
            }
            _ => {}
        }

        if update.finalized {
            info!(alert_id = %update.alert.id, status = ?update.alert.status, "Alert finalized");
            self.escalate(&update).await;
        }
    }

    /// Re-raise a failed high-priority alert once through fallback channels.
    async fn escalate(&self, update: &TaskUpdate) {
        let alert = &update.alert;
        if !alert.priority.escalates()
            || !matches!(alert.status, AlertStatus::Failed | AlertStatus::PartiallyFailed)
        {
            return;
        }
        if alert.is_escalation() {
            debug!(alert_id = %alert.id, "Escalation already used, not escalating again");
            return;
        }

        let failed: BTreeSet<Channel> = update
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
            .map(|task| task.channel)
            .collect();
        if failed.is_empty() {
            return;
        }

        let targets: Vec<Channel> = failed
            .iter()
            .map(Channel::fallback)
            .filter(|channel| !failed.contains(channel))
            .filter(|channel| {
                alert
                    .recipients
                    .iter()
                    .any(|recipient| recipient.address_for(*channel).is_some())
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            warn!(alert_id = %alert.id, "No reachable fallback channel left for escalation");
            return;
        }

        let now = self.clock.now();
        let kind = if alert.priority == AlertPriority::Critical || alert.kind == AlertKind::Emergency {
            AlertKind::Emergency
        } else {
            AlertKind::Delay
        };
        let escalated = Alert {
            id: Uuid::new_v4(),
            kind,
            priority: AlertPriority::Critical,
            channels: Some(targets.clone()),
            status: AlertStatus::Pending,
            created_at: now,
            updated_at: now,
            deadline_at: now + to_chrono(self.policy.deadline),
            escalation_depth: alert.escalation_depth + 1,
            parent_alert_id: Some(alert.id),
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledgement_note: None,
            ..alert.clone()
        };

        match self.submit(escalated).await {
            Ok(escalated_id) => warn!(
                alert_id = %alert.id,
                escalated_id = %escalated_id,
                "Escalated alert to {:?}",
                targets
            ),
            Err(e) => error!(alert_id = %alert.id, "Failed to escalate alert: {}", e),
        }
    }
}
