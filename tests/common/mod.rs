//! Shared fixtures for gateway TLS tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use gateway_tls::{AccountAddress, CertificateFilter, CertificateRecord, CertificateRegistry, CertificateState};
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyPair, SerialNumber,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Serial used by every test certificate, 12345 in decimal
pub const SERIAL_BYTES: [u8; 2] = [0x30, 0x39];
pub const SERIAL: &str = "12345";

/// A client certificate and its key
pub struct ClientCert {
    pub der: CertificateDer<'static>,
    pub key: KeyPair,
}

impl ClientCert {
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()))
    }
}

/// Canonical account address derived from `seed`
pub fn address(seed: u8) -> String {
    AccountAddress::from_bytes("akash", &[seed; 20]).unwrap().to_string()
}

fn params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, common_name);
    params.serial_number = Some(SerialNumber::from_slice(&SERIAL_BYTES));
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
    params
}

/// Self-issued client-auth certificate with `common_name` as subject and issuer
pub fn client_cert(common_name: &str) -> ClientCert {
    client_cert_with(common_name, |_| {})
}

/// Self-issued certificate with custom parameters
pub fn client_cert_with(common_name: &str, customize: impl FnOnce(&mut CertificateParams)) -> ClientCert {
    let mut params = params(common_name);
    customize(&mut params);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    ClientCert { der: cert.der().clone(), key }
}

/// Certificate for `subject` signed by a separate issuer named `issuer`
pub fn cert_issued_by(subject: &str, issuer: &str) -> ClientCert {
    let issuer_key = KeyPair::generate().unwrap();
    let issuer_cert = params(issuer).self_signed(&issuer_key).unwrap();

    let key = KeyPair::generate().unwrap();
    let cert = params(subject).signed_by(&key, &issuer_cert, &issuer_key).unwrap();
    ClientCert { der: cert.der().clone(), key }
}

/// Registry record in `state` for `owner` and the test serial
pub fn record(owner: &str, state: CertificateState) -> CertificateRecord {
    CertificateRecord {
        owner: owner.to_string(),
        serial: SERIAL.to_string(),
        state,
    }
}

/// How the stub registry answers
pub enum Reply {
    Records(Vec<CertificateRecord>),
    Fail(&'static str),
    Hang,
}

/// Registry returning a fixed reply regardless of the filter
pub struct StubRegistry {
    reply: Reply,
    calls: AtomicUsize,
    last_filter: Mutex<Option<CertificateFilter>>,
}

impl StubRegistry {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: AtomicUsize::new(0),
            last_filter: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_filter(&self) -> Option<CertificateFilter> {
        self.last_filter.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateRegistry for StubRegistry {
    async fn lookup_certificates(&self, filter: &CertificateFilter) -> Result<Vec<CertificateRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_filter.lock().unwrap() = Some(filter.clone());

        match &self.reply {
            Reply::Records(records) => Ok(records.clone()),
            Reply::Fail(reason) => Err(anyhow!("{}", reason)),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Layer counting ERROR events
#[derive(Clone, Default)]
pub struct ErrorEvents(Arc<AtomicUsize>);

impl ErrorEvents {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for ErrorEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}
