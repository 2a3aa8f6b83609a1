use crate::error::BridgeError;
use crate::models::{NoteId, NoteKey, Timestamp};
use crate::util::random_tab_id;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};

/// Channel tag keeping lesson-note traffic apart from other features' channels.
pub const FEATURE_TAG: &str = "lesson-notes";

/// Events exchanged between tabs editing the same (user, lesson).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeEvent {
    ContentChanged {
        content: String,
        updated_at: Timestamp,
    },
    NoteCreated {
        note_id: NoteId,
        lesson_id: String,
    },
    NoteDeleted {
        note_id: NoteId,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TabId(pub String);

impl TabId {
    pub fn random() -> Self {
        Self(random_tab_id())
    }
}

/// Wire format: every event carries the sending tab so loopback can be filtered.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub origin: TabId,
    pub event: BridgeEvent,
}

/// Topic name for a note key. Ids are percent-encoded so `::` cannot collide.
pub fn topic_for(key: &NoteKey) -> String {
    format!(
        "{FEATURE_TAG}::{}::{}",
        urlencoding::encode(&key.user_id),
        urlencoding::encode(&key.lesson_id)
    )
}

pub type Handler = Rc<dyn Fn(&str)>;

/// Keeps a subscription alive; dropping it unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

/// Best-effort topic pub/sub. No history, no cross-sender ordering.
pub trait Transport {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;
    fn subscribe(&self, topic: &str, handler: Handler) -> Result<Subscription, BridgeError>;
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Handler)>>,
}

/// In-process transport. Delivers synchronously to every subscriber of the topic,
/// the publisher's own subscriptions included.
#[derive(Clone, Default)]
pub struct LocalHub {
    inner: Rc<RefCell<HubInner>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.borrow().topics.get(topic).map_or(0, Vec::len)
    }
}

impl Transport for LocalHub {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        // Snapshot handlers first: a handler may subscribe or unsubscribe.
        let handlers: Vec<Handler> = self
            .inner
            .borrow()
            .topics
            .get(topic)
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for h in handlers {
            h(payload);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> Result<Subscription, BridgeError> {
        let id = {
            let mut inner = self.inner.borrow_mut();
            inner.next_id += 1;
            let id = inner.next_id;
            inner
                .topics
                .entry(topic.to_string())
                .or_default()
                .push((id, handler));
            id
        };

        let weak: Weak<RefCell<HubInner>> = Rc::downgrade(&self.inner);
        let topic = topic.to_string();
        Ok(Subscription::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut inner = inner.borrow_mut();
            if let Some(subs) = inner.topics.get_mut(&topic) {
                subs.retain(|(sid, _)| *sid != id);
                if subs.is_empty() {
                    inner.topics.remove(&topic);
                }
            }
        }))
    }
}

type Senders = RefCell<HashMap<String, (web_sys::BroadcastChannel, usize)>>;

fn open_channel(topic: &str) -> Result<web_sys::BroadcastChannel, BridgeError> {
    web_sys::BroadcastChannel::new(topic).map_err(|e| BridgeError::Transport(format!("{e:?}")))
}

fn post(ch: &web_sys::BroadcastChannel, payload: &str) -> Result<(), BridgeError> {
    ch.post_message(&JsValue::from_str(payload))
        .map_err(|e| BridgeError::Transport(format!("{e:?}")))
}

/// Browser `BroadcastChannel` transport.
///
/// A channel object never receives its own posts, but other channel objects in the
/// same tab do, so the bridge still filters by origin. The sending channel for a topic
/// lives as long as the topic has subscribers here.
#[derive(Default)]
pub struct BroadcastChannelTransport {
    /// topic -> (sender, live subscriptions)
    senders: Rc<Senders>,
}

impl BroadcastChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics with an open sending channel.
    pub fn open_topics(&self) -> usize {
        self.senders.borrow().len()
    }
}

impl Transport for BroadcastChannelTransport {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        if let Some((ch, _)) = self.senders.borrow().get(topic) {
            return post(ch, payload);
        }
        let ch = open_channel(topic)?;
        let res = post(&ch, payload);
        ch.close();
        res
    }

    fn subscribe(&self, topic: &str, handler: Handler) -> Result<Subscription, BridgeError> {
        let ch = open_channel(topic)?;
        {
            let mut senders = self.senders.borrow_mut();
            match senders.get_mut(topic) {
                Some((_, live)) => *live += 1,
                None => {
                    let sender = open_channel(topic).inspect_err(|_| ch.close())?;
                    senders.insert(topic.to_string(), (sender, 1));
                }
            }
        }

        let cb = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(
            move |ev: web_sys::MessageEvent| match ev.data().as_string() {
                Some(payload) => handler(&payload),
                None => tracing::warn!("ignoring non-string broadcast payload"),
            },
        );
        ch.set_onmessage(Some(cb.as_ref().unchecked_ref()));

        let senders: Weak<Senders> = Rc::downgrade(&self.senders);
        let topic = topic.to_string();
        Ok(Subscription::new(move || {
            ch.set_onmessage(None);
            ch.close();
            drop(cb);

            let Some(senders) = senders.upgrade() else {
                return;
            };
            let mut senders = senders.borrow_mut();
            let last = senders.get_mut(&topic).is_some_and(|(_, live)| {
                *live -= 1;
                *live == 0
            });
            if last {
                if let Some((sender, _)) = senders.remove(&topic) {
                    sender.close();
                }
            }
        }))
    }
}

/// Typed, per-tab view over a transport.
pub struct CrossTabBridge {
    tab_id: TabId,
    transport: Rc<dyn Transport>,
}

impl CrossTabBridge {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self::with_tab_id(TabId::random(), transport)
    }

    pub fn with_tab_id(tab_id: TabId, transport: Rc<dyn Transport>) -> Self {
        Self { tab_id, transport }
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn encode(&self, event: &BridgeEvent) -> Result<String, BridgeError> {
        serde_json::to_string(&Envelope {
            origin: self.tab_id.clone(),
            event: event.clone(),
        })
        .map_err(BridgeError::Encode)
    }

    /// `Ok(None)` for our own loopback; `Err` for anything malformed.
    pub fn decode(&self, payload: &str) -> Result<Option<BridgeEvent>, BridgeError> {
        let env: Envelope = serde_json::from_str(payload).map_err(BridgeError::Decode)?;
        if env.origin == self.tab_id {
            return Ok(None);
        }
        Ok(Some(env.event))
    }

    /// Fire and forget. Failures are logged, never surfaced.
    pub fn publish(&self, key: &NoteKey, event: &BridgeEvent) {
        let topic = topic_for(key);
        let res = self
            .encode(event)
            .and_then(|payload| self.transport.publish(&topic, &payload));
        if let Err(e) = res {
            tracing::warn!(topic = %topic, error = %e, "bridge publish failed");
        }
    }

    pub fn subscribe(
        &self,
        key: &NoteKey,
        on_event: impl Fn(BridgeEvent) + 'static,
    ) -> Option<Subscription> {
        let topic = topic_for(key);
        let me = CrossTabBridge::with_tab_id(self.tab_id.clone(), self.transport.clone());
        let handler: Handler = Rc::new(move |payload: &str| match me.decode(payload) {
            Ok(Some(event)) => on_event(event),
            Ok(None) => tracing::trace!("dropping own broadcast"),
            Err(e) => tracing::warn!(error = %e, "dropping malformed broadcast"),
        });

        match self.transport.subscribe(&topic, handler) {
            Ok(sub) => Some(sub),
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "bridge subscribe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(hub: &LocalHub, tab: &str) -> CrossTabBridge {
        CrossTabBridge::with_tab_id(TabId(tab.to_string()), Rc::new(hub.clone()))
    }

    fn collect(b: &CrossTabBridge, key: &NoteKey) -> (Rc<RefCell<Vec<BridgeEvent>>>, Option<Subscription>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let sub = b.subscribe(key, move |ev| s.borrow_mut().push(ev));
        (seen, sub)
    }

    #[test]
    fn test_topic_is_scoped_and_escaped() {
        let a = topic_for(&NoteKey::new("u1", "l1"));
        let b = topic_for(&NoteKey::new("u1::l1", ""));
        assert_eq!(a, "lesson-notes::u1::l1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_wire_shape() {
        let v = serde_json::to_value(BridgeEvent::ContentChanged {
            content: "hi".to_string(),
            updated_at: Timestamp(7),
        })
        .expect("should serialize");
        assert_eq!(v["type"], "content-changed");
        assert_eq!(v["updated_at"], 7);
    }

    #[test]
    fn test_sibling_receives_and_sender_filters_loopback() {
        let hub = LocalHub::new();
        let key = NoteKey::new("u1", "l1");
        let t1 = bridge(&hub, "t1");
        let t2 = bridge(&hub, "t2");
        let (seen1, _s1) = collect(&t1, &key);
        let (seen2, _s2) = collect(&t2, &key);

        let ev = BridgeEvent::NoteDeleted {
            note_id: NoteId::new("n1"),
        };
        t1.publish(&key, &ev);

        assert!(seen1.borrow().is_empty());
        assert_eq!(*seen2.borrow(), vec![ev]);
    }

    #[test]
    fn test_other_lesson_is_not_delivered() {
        let hub = LocalHub::new();
        let t1 = bridge(&hub, "t1");
        let t2 = bridge(&hub, "t2");
        let (seen2, _s2) = collect(&t2, &NoteKey::new("u1", "l2"));

        t1.publish(
            &NoteKey::new("u1", "l1"),
            &BridgeEvent::NoteDeleted {
                note_id: NoteId::new("n1"),
            },
        );
        assert!(seen2.borrow().is_empty());
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let hub = LocalHub::new();
        let key = NoteKey::new("u1", "l1");
        let t2 = bridge(&hub, "t2");
        let (seen2, _s2) = collect(&t2, &key);

        hub.publish(&topic_for(&key), "{not json").expect("publish");
        hub.publish(
            &topic_for(&key),
            r#"{"origin":"t9","event":{"type":"content-changed","content":"x"}}"#,
        )
        .expect("publish");

        assert!(seen2.borrow().is_empty());
        assert!(matches!(t2.decode("[]"), Err(BridgeError::Decode(_))));
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let hub = LocalHub::new();
        let key = NoteKey::new("u1", "l1");
        let t2 = bridge(&hub, "t2");
        let (_seen, sub) = collect(&t2, &key);
        assert_eq!(hub.subscriber_count(&topic_for(&key)), 1);

        drop(sub);
        assert_eq!(hub.subscriber_count(&topic_for(&key)), 0);
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_sender_closes_with_last_subscription() {
        let transport = BroadcastChannelTransport::new();
        let a = transport
            .subscribe("lesson-notes::t::a", Rc::new(|_: &str| {}))
            .expect("subscribe");
        let b = transport
            .subscribe("lesson-notes::t::a", Rc::new(|_: &str| {}))
            .expect("subscribe");
        let c = transport
            .subscribe("lesson-notes::t::b", Rc::new(|_: &str| {}))
            .expect("subscribe");
        assert_eq!(transport.open_topics(), 2);

        drop(a);
        assert_eq!(transport.open_topics(), 2);
        drop(b);
        drop(c);
        assert_eq!(transport.open_topics(), 0);

        transport
            .publish("lesson-notes::t::a", "{}")
            .expect("publish without subscribers");
        assert_eq!(transport.open_topics(), 0);
    }
}
