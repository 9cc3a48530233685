use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use embedq_protocol::{subject, Message, ServerOp};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

struct Subscription {
    filter: String,
    queue_group: Option<String>,
    max_msgs: Option<u64>,
    delivered: u64,
}

struct ClientEntry {
    tx: mpsc::Sender<ServerOp>,
    echo: bool,
    subs: HashMap<u64, Subscription>,
}

/// Subscription table and fan-out for every connected client.
///
/// Critical sections never await; deliveries go through each client's
/// bounded queue with `try_send`, and a client whose queue is full is
/// dropped from the table (its connection then closes).
#[derive(Default)]
pub(crate) struct Router {
    clients: Mutex<HashMap<u64, ClientEntry>>,
    queue_cursor: AtomicUsize,
}

impl Router {
    fn clients(&self) -> MutexGuard<'_, HashMap<u64, ClientEntry>> {
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, client_id: u64, tx: mpsc::Sender<ServerOp>) {
        self.clients().insert(
            client_id,
            ClientEntry {
                tx,
                echo: true,
                subs: HashMap::new(),
            },
        );
    }

    pub fn remove_client(&self, client_id: u64) {
        if let Some(entry) = self.clients().remove(&client_id) {
            debug!(client_id, subscriptions = entry.subs.len(), "client removed");
        }
    }

    pub fn set_echo(&self, client_id: u64, echo: bool) {
        if let Some(entry) = self.clients().get_mut(&client_id) {
            entry.echo = echo;
        }
    }

    pub fn subscribe(&self, client_id: u64, sid: u64, filter: String, queue_group: Option<String>) {
        if let Some(entry) = self.clients().get_mut(&client_id) {
            debug!(client_id, sid, %filter, ?queue_group, "subscribe");
            entry.subs.insert(
                sid,
                Subscription {
                    filter,
                    queue_group,
                    max_msgs: None,
                    delivered: 0,
                },
            );
        }
    }

    /// Removes `sid` now, or once it has delivered `max_msgs` in total.
    pub fn unsubscribe(&self, client_id: u64, sid: u64, max_msgs: Option<u64>) {
        let mut clients = self.clients();
        let Some(entry) = clients.get_mut(&client_id) else {
            return;
        };
        let expired = match (entry.subs.get_mut(&sid), max_msgs) {
            (None, _) => return,
            (Some(_), None) => true,
            (Some(sub), Some(max)) => {
                sub.max_msgs = Some(max);
                sub.delivered >= max
            }
        };
        if expired {
            entry.subs.remove(&sid);
        }
    }

    /// Delivers to every matching plain subscription and to one member of
    /// each matching queue group. Returns how many deliveries were queued.
    pub fn publish(
        &self,
        origin: u64,
        subject: &str,
        reply_to: Option<&str>,
        payload: Bytes,
    ) -> usize {
        let mut clients = self.clients();

        let mut targets: Vec<(u64, u64)> = Vec::new();
        let mut groups: HashMap<(&str, &str), Vec<(u64, u64)>> = HashMap::new();
        for (&client_id, entry) in clients.iter() {
            if client_id == origin && !entry.echo {
                continue;
            }
            for (&sid, sub) in &entry.subs {
                if !subject::matches(&sub.filter, subject) {
                    continue;
                }
                match &sub.queue_group {
                    Some(queue) => groups
                        .entry((sub.filter.as_str(), queue.as_str()))
                        .or_default()
                        .push((client_id, sid)),
                    None => targets.push((client_id, sid)),
                }
            }
        }
        for mut members in groups.into_values() {
            members.sort_unstable();
            let pick = self.queue_cursor.fetch_add(1, Ordering::Relaxed) % members.len();
            targets.push(members[pick]);
        }

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (client_id, sid) in targets {
            let Some(entry) = clients.get_mut(&client_id) else {
                continue;
            };
            let msg = ServerOp::Msg(Message {
                subject: subject.to_string(),
                sid,
                reply_to: reply_to.map(str::to_string),
                payload: payload.clone(),
            });
            match entry.tx.try_send(msg) {
                Ok(()) => {
                    delivered += 1;
                    let expired = entry.subs.get_mut(&sid).is_some_and(|sub| {
                        sub.delivered += 1;
                        sub.max_msgs.is_some_and(|max| sub.delivered >= max)
                    });
                    if expired {
                        entry.subs.remove(&sid);
                    }
                }
                Err(TrySendError::Full(_)) => {
                    warn!(client_id, "slow consumer, disconnecting");
                    dropped.push(client_id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(client_id),
            }
        }
        for client_id in dropped {
            clients.remove(&client_id);
        }
        delivered
    }

    #[cfg(test)]
    fn subscription_count(&self, client_id: u64) -> usize {
        self.clients().get(&client_id).map_or(0, |e| e.subs.len())
    }
}
