//! Deterministic payment gateway double.
//!
//! Verify answers are set per reference and repeat until changed. Refund
//! answers are a queue consumed one per call, defaulting to `pending` with a
//! fresh ticket when empty. No network I/O.

use async_trait::async_trait;
use serde_json::json;
use sfr_engine::{
    ChargeStatus, ChargeVerification, GatewayError, PaymentGateway, RefundInitStatus,
    RefundTicket,
};
use sfr_schemas::Minor;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct ScriptedGateway {
    verify: Mutex<HashMap<String, Result<ChargeVerification, GatewayError>>>,
    refunds: Mutex<VecDeque<Result<RefundTicket, GatewayError>>>,
    refund_calls: Mutex<Vec<(String, Minor)>>,
    verify_calls: Mutex<Vec<String>>,
    /// Applied to every call before answering.
    delay: Mutex<Option<Duration>>,
    next_ticket: Mutex<u64>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn charge_success(&self, reference: &str, channel: &str, amount: Minor) {
        self.set_verify(
            reference,
            Ok(verification(ChargeStatus::Success, Some(channel), Some(amount), None)),
        );
    }

    pub fn charge_status(&self, reference: &str, status: &str, gateway_response: Option<&str>) {
        self.set_verify(
            reference,
            Ok(verification(
                ChargeStatus::parse(status),
                None,
                None,
                gateway_response,
            )),
        );
    }

    pub fn set_verify(&self, reference: &str, answer: Result<ChargeVerification, GatewayError>) {
        if let Ok(mut g) = self.verify.lock() {
            g.insert(reference.to_string(), answer);
        }
    }

    pub fn push_refund(&self, answer: Result<RefundTicket, GatewayError>) {
        if let Ok(mut g) = self.refunds.lock() {
            g.push_back(answer);
        }
    }

    pub fn push_refund_status(&self, status: RefundInitStatus) {
        let ticket = self.fresh_ticket();
        self.push_refund(Ok(RefundTicket {
            status,
            ticket_id: Some(ticket),
            raw: json!({ "status": status.as_str() }),
        }));
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut g) = self.delay.lock() {
            *g = delay;
        }
    }

    pub fn refund_calls(&self) -> Vec<(String, Minor)> {
        self.refund_calls.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn verify_calls(&self) -> Vec<String> {
        self.verify_calls.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn fresh_ticket(&self) -> String {
        let n = self
            .next_ticket
            .lock()
            .map(|mut g| {
                *g += 1;
                *g
            })
            .unwrap_or(0);
        format!("RFD-{n:06}")
    }

    async fn pause(&self) {
        let delay = self.delay.lock().ok().and_then(|g| *g);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

fn verification(
    status: ChargeStatus,
    channel: Option<&str>,
    amount: Option<Minor>,
    gateway_response: Option<&str>,
) -> ChargeVerification {
    ChargeVerification {
        raw: json!({
            "status": status.as_str(),
            "channel": channel,
            "amount": amount,
            "gateway_response": gateway_response,
        }),
        status,
        method: channel.map(str::to_string),
        amount,
        gateway_response: gateway_response.map(str::to_string),
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn verify(&self, reference: &str) -> Result<ChargeVerification, GatewayError> {
        if let Ok(mut g) = self.verify_calls.lock() {
            g.push(reference.to_string());
        }
        self.pause().await;
        let answer = self
            .verify
            .lock()
            .ok()
            .and_then(|g| g.get(reference).cloned());
        answer.unwrap_or_else(|| {
            Ok(verification(
                ChargeStatus::Unsettled("pending".to_string()),
                None,
                None,
                None,
            ))
        })
    }

    async fn initiate_refund(
        &self,
        reference: &str,
        amount: Minor,
    ) -> Result<RefundTicket, GatewayError> {
        if let Ok(mut g) = self.refund_calls.lock() {
            g.push((reference.to_string(), amount));
        }
        self.pause().await;
        let scripted = self.refunds.lock().ok().and_then(|mut g| g.pop_front());
        match scripted {
            Some(answer) => answer,
            None => Ok(RefundTicket {
                status: RefundInitStatus::Pending,
                ticket_id: Some(self.fresh_ticket()),
                raw: json!({ "status": "pending" }),
            }),
        }
    }
}
