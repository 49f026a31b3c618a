use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;

use network_messages::InvVector;
use utils::mutable_once::MutableOnce;
use utils::timers::Timers;
use utils::unique_id::UniqueId;

/// An agent as seen by the coordinator: something that can fetch a vector
/// from its peer.
pub trait VectorRequester: Send + Sync {
    fn requester_id(&self) -> UniqueId;
    fn is_closed(&self) -> bool;
    /// Queues the vector for fetching; the agent batches and sends the
    /// actual `get-data`.
    fn request_vector(&self, vector: InvVector);
}

/// Cross-peer arbiter deciding which agent fetches each announced object.
pub trait InvRequestManager: Send + Sync {
    /// Called by an agent whose peer announced an unknown `vector`. Exactly
    /// one of the asking agents receives a `request_vector` callback.
    fn ask_to_request_vector(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector);

    /// The object behind `vector` arrived at some agent.
    fn note_vector_received(&self, vector: &InvVector);

    /// `agent` failed to produce the object; another candidate may take over.
    fn note_vector_not_received(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector);
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum InventoryManagerTimer {
    Request(InvVector),
}

struct RequestRecord {
    current: (UniqueId, Weak<dyn VectorRequester>),
    backups: VecDeque<(UniqueId, Weak<dyn VectorRequester>)>,
}

/// Reference coordinator: the first announcing agent fetches, later ones are
/// kept as backups and promoted when the current agent times out, vanishes or
/// reports `not-found`.
pub struct InventoryManager {
    vectors_to_request: RwLock<HashMap<InvVector, RequestRecord>>,
    timers: Timers<InventoryManagerTimer>,
    timeout: Duration,
    self_weak: MutableOnce<Weak<InventoryManager>>,
}

impl InventoryManager {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new() -> Arc<Self> {
        Self::with_timeout(Self::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Arc<Self> {
        let this = Arc::new(InventoryManager {
            vectors_to_request: RwLock::new(HashMap::new()),
            timers: Timers::new(),
            timeout,
            self_weak: MutableOnce::new(Weak::new()),
        });
        unsafe { this.self_weak.replace(Arc::downgrade(&this)) };
        this
    }

    fn start_request(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector) {
        agent.request_vector(vector.clone());

        let weak = self.self_weak.clone();
        let agent_id = agent.requester_id();
        let vector1 = vector.clone();
        self.timers.set_delay(
            InventoryManagerTimer::Request(vector.clone()),
            move || {
                let this = upgrade_weak!(weak);
                this.promote_next(agent_id, &vector1);
            },
            self.timeout,
        );
    }

    /// Hands the vector to the next living backup, or forgets it when no
    /// candidate remains.
    fn promote_next(&self, failed_id: UniqueId, vector: &InvVector) {
        self.timers
            .clear_delay(&InventoryManagerTimer::Request(vector.clone()));

        let mut next_agent: Option<Arc<dyn VectorRequester>> = None;
        {
            let mut vectors_to_request = self.vectors_to_request.write();
            let record = match vectors_to_request.get_mut(vector) {
                Some(record) => record,
                None => return,
            };
            if record.current.0 != failed_id {
                // A different agent owns the request by now; only drop the
                // failed one from the backup list.
                record.backups.retain(|(id, _)| *id != failed_id);
                return;
            }
            while let Some((id, weak_agent)) = record.backups.pop_front() {
                if let Some(agent) = weak_agent.upgrade() {
                    if !agent.is_closed() {
                        record.current = (id, Arc::downgrade(&agent));
                        next_agent = Some(agent);
                        break;
                    }
                }
            }
            if next_agent.is_none() {
                vectors_to_request.remove(vector);
            }
        }

        if let Some(agent) = next_agent {
            self.start_request(&agent, vector);
        }
    }
}

impl InvRequestManager for InventoryManager {
    fn ask_to_request_vector(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector) {
        let start = {
            let mut vectors_to_request = self.vectors_to_request.write();
            match vectors_to_request.get_mut(vector) {
                Some(record) => {
                    let current_alive = record
                        .current
                        .1
                        .upgrade()
                        .map(|current| !current.is_closed())
                        .unwrap_or(false);
                    if current_alive {
                        let id = agent.requester_id();
                        if record.current.0 != id && !record.backups.iter().any(|(b, _)| *b == id)
                        {
                            record.backups.push_back((id, Arc::downgrade(agent)));
                        }
                        false
                    } else {
                        record.current = (agent.requester_id(), Arc::downgrade(agent));
                        true
                    }
                }
                None => {
                    vectors_to_request.insert(
                        vector.clone(),
                        RequestRecord {
                            current: (agent.requester_id(), Arc::downgrade(agent)),
                            backups: VecDeque::new(),
                        },
                    );
                    true
                }
            }
        };

        if start {
            self.start_request(agent, vector);
        }
    }

    fn note_vector_received(&self, vector: &InvVector) {
        self.timers
            .clear_delay(&InventoryManagerTimer::Request(vector.clone()));
        self.vectors_to_request.write().remove(vector);
    }

    fn note_vector_not_received(&self, agent: &Arc<dyn VectorRequester>, vector: &InvVector) {
        self.promote_next(agent.requester_id(), vector);
    }
}
