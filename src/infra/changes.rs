use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Single NOTIFY channel carrying all row-level change events.
pub const CHANGE_CHANNEL: &str = "penora_changes";

const FANOUT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification. Carries only the table and row id;
/// consumers that need the row contents point-fetch it themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    pub id: Uuid,
}

impl ChangeEvent {
    pub fn new(table: &str, op: ChangeOp, id: Uuid) -> Self {
        Self {
            table: table.to_string(),
            op,
            id,
        }
    }
}

/// Publish a change event on the given executor. Called inside the same
/// transaction as the row change so the notification fires only on commit.
pub async fn publish<'e, E>(executor: E, event: &ChangeEvent) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    let payload = serde_json::to_string(event)?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANGE_CHANNEL)
        .bind(payload)
        .execute(executor)
        .await?;
    Ok(())
}

/// Listens on the NOTIFY channel and fans decoded events out to in-process
/// subscribers over a broadcast channel. Subscribers that fall behind lose
/// events; there is no redelivery and no reconnect once the listener ends.
pub struct ChangeBroker {
    sender: broadcast::Sender<ChangeEvent>,
    worker: JoinHandle<()>,
}

impl ChangeBroker {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let mut listener = PgListener::connect(database_url).await?;
        listener.listen(CHANGE_CHANNEL).await?;

        let (sender, _) = broadcast::channel(FANOUT_BUFFER);
        let fanout = sender.clone();
        let worker = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match serde_json::from_str::<ChangeEvent>(notification.payload()) {
                            Ok(event) => {
                                // Send fails only when no subscriber exists; fine either way.
                                let _ = fanout.send(event);
                            }
                            Err(err) => {
                                tracing::warn!(
                                    error = ?err,
                                    payload = notification.payload(),
                                    "dropping undecodable change notification"
                                );
                            }
                        }
                    }
                    Err(err) => {
                        tracing::error!(error = ?err, "change listener closed");
                        break;
                    }
                }
            }
        });

        Ok(Self { sender, worker })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}
