#![allow(dead_code)]

use async_trait::async_trait;
use permit_arbiter::{
    ArbiterConfig, ArbiterError, ArbiterResult, ArbitrationEngine, BasketAccessRequest,
    CertificateAccessRequest, FocusControl, GroupRequest, GroupedPermissions, ModalPresenter,
    ProtocolAccessRequest, ProtocolRequestKind, SpendingRequest, Surface, WalletPermissions,
};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCall {
    IsFocused,
    RequestFocus,
    RelinquishFocus,
    Open(Surface),
    Close(Surface),
}

/// Window + UI double that records every call in order.
#[derive(Default)]
pub struct RecordingHost {
    focused: Mutex<bool>,
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    pub fn new(focused: bool) -> Arc<Self> {
        Arc::new(Self {
            focused: Mutex::new(focused),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: HostCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn is_focused(&self) -> bool {
        *self.focused.lock().unwrap()
    }

    /// Whether `surface`'s modal is currently shown, replaying the call log.
    pub fn is_open(&self, surface: Surface) -> bool {
        self.calls().into_iter().fold(false, |open, call| match call {
            HostCall::Open(s) if s == surface => true,
            HostCall::Close(s) if s == surface => false,
            _ => open,
        })
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl FocusControl for RecordingHost {
    async fn is_focused(&self) -> ArbiterResult<bool> {
        self.record(HostCall::IsFocused);
        Ok(*self.focused.lock().unwrap())
    }

    async fn request_focus(&self) -> ArbiterResult<()> {
        self.record(HostCall::RequestFocus);
        *self.focused.lock().unwrap() = true;
        Ok(())
    }

    async fn relinquish_focus(&self) -> ArbiterResult<()> {
        self.record(HostCall::RelinquishFocus);
        *self.focused.lock().unwrap() = false;
        Ok(())
    }
}

#[async_trait]
impl ModalPresenter for RecordingHost {
    async fn open_modal(&self, surface: Surface) {
        self.record(HostCall::Open(surface));
    }

    async fn close_modal(&self, surface: Surface) {
        self.record(HostCall::Close(surface));
    }
}

/// Wallet double. Fails every call while `failing` is set.
#[derive(Default)]
pub struct FakeWallet {
    pub grants: Mutex<Vec<(String, JsonValue)>>,
    pub denies: Mutex<Vec<String>>,
    pub revokes: Mutex<Vec<JsonValue>>,
    failing: AtomicBool,
}

impl FakeWallet {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> ArbiterResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(ArbiterError::Wallet("storage unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WalletPermissions for FakeWallet {
    async fn grant_grouped_permission(
        &self,
        request_id: &str,
        granted: &JsonValue,
    ) -> ArbiterResult<()> {
        self.check()?;
        self.grants
            .lock()
            .unwrap()
            .push((request_id.to_string(), granted.clone()));
        Ok(())
    }

    async fn deny_grouped_permission(&self, request_id: &str) -> ArbiterResult<()> {
        self.check()?;
        self.denies.lock().unwrap().push(request_id.to_string());
        Ok(())
    }

    async fn revoke_permission(&self, token: &JsonValue) -> ArbiterResult<()> {
        self.check()?;
        self.revokes.lock().unwrap().push(token.clone());
        Ok(())
    }
}

/// Wallet double whose calls never complete.
pub struct StalledWallet;

#[async_trait]
impl WalletPermissions for StalledWallet {
    async fn grant_grouped_permission(&self, _: &str, _: &JsonValue) -> ArbiterResult<()> {
        std::future::pending().await
    }

    async fn deny_grouped_permission(&self, _: &str) -> ArbiterResult<()> {
        std::future::pending().await
    }

    async fn revoke_permission(&self, _: &JsonValue) -> ArbiterResult<()> {
        std::future::pending().await
    }
}

/// Engine wired to a wallet that never answers.
pub fn stalled_harness(grace_window_ms: u64) -> (ArbitrationEngine, Arc<RecordingHost>) {
    init_tracing();
    let host = RecordingHost::new(true);
    let engine = ArbitrationEngine::new(
        ArbiterConfig { grace_window_ms },
        Arc::new(StalledWallet),
        host.clone(),
        host.clone(),
    );
    (engine, host)
}

pub struct Harness {
    pub engine: ArbitrationEngine,
    pub host: Arc<RecordingHost>,
    pub wallet: Arc<FakeWallet>,
}

pub fn harness(grace_window_ms: u64, focused: bool) -> Harness {
    init_tracing();
    let host = RecordingHost::new(focused);
    let wallet = Arc::new(FakeWallet::default());
    let engine = ArbitrationEngine::new(
        ArbiterConfig { grace_window_ms },
        wallet.clone(),
        host.clone(),
        host.clone(),
    );
    Harness {
        engine,
        host,
        wallet,
    }
}

pub fn basket(id: &str, name: &str) -> BasketAccessRequest {
    BasketAccessRequest {
        id: id.to_string(),
        basket: Some(name.to_string()),
        originator: "app.example".to_string(),
        reason: None,
        renewal: None,
    }
}

pub fn certificate(id: &str, cert_type: &str, fields: &[&str]) -> CertificateAccessRequest {
    CertificateAccessRequest {
        id: id.to_string(),
        originator: "app.example".to_string(),
        certificate_type: Some(cert_type.to_string()),
        fields: fields.iter().map(|f| f.to_string()).collect(),
        verifier: None,
        reason: None,
        renewal: None,
    }
}

pub fn protocol(id: &str, name: &str) -> ProtocolAccessRequest {
    ProtocolAccessRequest {
        id: id.to_string(),
        security_level: 2,
        protocol_id: name.to_string(),
        counterparty: Some("self".to_string()),
        originator: Some("app.example".to_string()),
        reason: None,
        renewal: None,
        kind: ProtocolRequestKind::Protocol,
    }
}

pub fn spending(id: &str, amount: u64) -> SpendingRequest {
    SpendingRequest {
        id: id.to_string(),
        originator: "app.example".to_string(),
        authorization_amount: amount,
        line_items: vec![],
        reason: None,
        renewal: None,
    }
}

pub fn group(id: &str) -> GroupRequest {
    GroupRequest {
        id: id.to_string(),
        originator: "app.example".to_string(),
        permissions: GroupedPermissions::default(),
    }
}
