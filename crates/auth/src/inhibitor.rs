//! Inhibitor Registry (C7): the three daemon-level lists plus per-device
//! polling/spindown lists, and caller-disconnect cleanup. Grounded on
//! `inhibitor.c`'s cookie/caller tracking, generalized away from a
//! specific transport's unique-connection-name convention.

use std::collections::HashMap;
use std::sync::Arc;

use storaged_model::ObjectId;
use tokio::sync::Notify;

/// Opaque identity of a remote caller (the transport's connection name,
/// in the original source). `Arc<Notify>` lets multiple interested
/// parties (the authorization gate, inhibitor cleanup) share one
/// disconnect signal per caller without the registry owning them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(pub String);

/// One outstanding inhibitor: which caller holds it, under what cookie,
/// and (for spindown inhibitors only) the requested timeout in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inhibitor {
    pub caller: CallerId,
    pub cookie: String,
    pub spindown_timeout_secs: Option<u32>,
}

/// Tracks a disconnect-notification channel per connected caller.
#[derive(Debug, Default)]
pub struct CallerRegistry {
    notifiers: HashMap<CallerId, Arc<Notify>>,
}

impl CallerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared disconnect signal for `caller`, created on first use.
    pub fn notifier_for(&mut self, caller: &CallerId) -> Arc<Notify> {
        self.notifiers
            .entry(caller.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Observe a caller disconnecting: a one-shot event, so `notify_one`
    /// (which stores a permit even if nobody is waiting yet) rather than
    /// `notify_waiters` (which would silently drop the event if the gate
    /// hasn't started its `.notified()` wait yet).
    pub fn disconnect(&mut self, caller: &CallerId) {
        if let Some(n) = self.notifiers.remove(caller) {
            n.notify_one();
        }
    }
}

/// The three daemon-scoped lists plus per-device polling/spindown lists
/// (§4.7).
#[derive(Debug, Default)]
pub struct InhibitorRegistry {
    pub polling: Vec<Inhibitor>,
    pub spindown: Vec<Inhibitor>,
    pub service: Vec<Inhibitor>,
    device_polling: HashMap<ObjectId, Vec<Inhibitor>>,
    device_spindown: HashMap<ObjectId, Vec<Inhibitor>>,
    next_cookie: u64,
}

impl InhibitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_cookie(&mut self) -> String {
        self.next_cookie += 1;
        format!("cookie-{}", self.next_cookie)
    }

    pub fn is_service_inhibited(&self) -> bool {
        !self.service.is_empty()
    }

    pub fn inhibit_service(&mut self, caller: CallerId) -> String {
        let cookie = self.mint_cookie();
        self.service.push(Inhibitor { caller, cookie: cookie.clone(), spindown_timeout_secs: None });
        cookie
    }

    pub fn inhibit_all_polling(&mut self, caller: CallerId) -> String {
        let cookie = self.mint_cookie();
        self.polling.push(Inhibitor { caller, cookie: cookie.clone(), spindown_timeout_secs: None });
        cookie
    }

    pub fn is_polling_inhibited(&self) -> bool {
        !self.polling.is_empty()
    }

    /// Remove a daemon-scoped inhibitor (service or all-polling) by caller
    /// and cookie. Returns `true` if one was found and removed.
    fn uninhibit(list: &mut Vec<Inhibitor>, caller: &CallerId, cookie: &str) -> bool {
        let before = list.len();
        list.retain(|i| !(i.caller == *caller && i.cookie == cookie));
        list.len() != before
    }

    pub fn uninhibit_service(&mut self, caller: &CallerId, cookie: &str) -> bool {
        Self::uninhibit(&mut self.service, caller, cookie)
    }

    pub fn uninhibit_all_polling(&mut self, caller: &CallerId, cookie: &str) -> bool {
        Self::uninhibit(&mut self.polling, caller, cookie)
    }

    /// Per-device polling inhibition (a Drive Inhibit Polling call).
    pub fn inhibit_device_polling(&mut self, device: ObjectId, caller: CallerId) -> String {
        let cookie = self.mint_cookie();
        self.device_polling.entry(device).or_default().push(Inhibitor {
            caller,
            cookie: cookie.clone(),
            spindown_timeout_secs: None,
        });
        cookie
    }

    pub fn is_device_polling_inhibited(&self, device: &ObjectId) -> bool {
        self.device_polling.get(device).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Set (or refresh) this caller's spindown timeout request on
    /// `device`. Lower-of-all-timeouts wins across every caller's
    /// request (§4.12 Drive Inhibit Polling / Set Spindown Timeout).
    pub fn set_device_spindown_timeout(&mut self, device: ObjectId, caller: CallerId, timeout_secs: u32) -> String {
        let cookie = self.mint_cookie();
        self.device_spindown.entry(device).or_default().push(Inhibitor {
            caller,
            cookie: cookie.clone(),
            spindown_timeout_secs: Some(timeout_secs),
        });
        cookie
    }

    pub fn unset_device_spindown_timeout(&mut self, device: &ObjectId, caller: &CallerId, cookie: &str) -> bool {
        match self.device_spindown.get_mut(device) {
            Some(list) => Self::uninhibit(list, caller, cookie),
            None => false,
        }
    }

    /// The effective spindown timeout for `device`: the minimum of every
    /// outstanding request, or `None` if nobody has set one (caller
    /// should fall back to the configured default).
    pub fn effective_spindown_timeout(&self, device: &ObjectId) -> Option<u32> {
        self.device_spindown.get(device).and_then(|v| v.iter().filter_map(|i| i.spindown_timeout_secs).min())
    }

    /// Remove every inhibitor `caller` holds, across all lists (§4.7:
    /// "when a caller disconnects, every inhibitor they hold is
    /// removed").
    pub fn remove_all_for_caller(&mut self, caller: &CallerId) {
        self.service.retain(|i| i.caller != *caller);
        self.polling.retain(|i| i.caller != *caller);
        self.spindown.retain(|i| i.caller != *caller);
        for list in self.device_polling.values_mut() {
            list.retain(|i| i.caller != *caller);
        }
        for list in self.device_spindown.values_mut() {
            list.retain(|i| i.caller != *caller);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_inhibit_uninhibit() {
        let mut reg = InhibitorRegistry::new();
        let caller = CallerId("caller-a".into());
        assert!(!reg.is_service_inhibited());
        let cookie = reg.inhibit_service(caller.clone());
        assert!(reg.is_service_inhibited());
        assert!(reg.uninhibit_service(&caller, &cookie));
        assert!(!reg.is_service_inhibited());
    }

    #[test]
    fn test_two_polling_inhibitors_both_must_release() {
        let mut reg = InhibitorRegistry::new();
        let a = CallerId("a".into());
        let b = CallerId("b".into());
        let ca = reg.inhibit_all_polling(a.clone());
        let cb = reg.inhibit_all_polling(b.clone());
        assert!(reg.is_polling_inhibited());
        reg.remove_all_for_caller(&b);
        assert!(reg.is_polling_inhibited());
        assert!(reg.uninhibit_all_polling(&a, &ca));
        assert!(!reg.is_polling_inhibited());
        let _ = cb;
    }

    #[test]
    fn test_lower_of_all_spindown_timeouts_wins() {
        let mut reg = InhibitorRegistry::new();
        let device = ObjectId::from_native_path("block/sda");
        reg.set_device_spindown_timeout(device.clone(), CallerId("a".into()), 300);
        reg.set_device_spindown_timeout(device.clone(), CallerId("b".into()), 60);
        assert_eq!(reg.effective_spindown_timeout(&device), Some(60));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_waiters() {
        let mut callers = CallerRegistry::new();
        let caller = CallerId("a".into());
        let notifier = callers.notifier_for(&caller);
        let wait = tokio::spawn(async move { notifier.notified().await });
        callers.disconnect(&caller);
        tokio::time::timeout(std::time::Duration::from_secs(1), wait)
            .await
            .expect("notified")
            .unwrap();
    }
}
