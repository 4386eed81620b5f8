use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ldk_server_client::client::LdkServerClient;
use ldk_server_client::error::{LdkServerError, LdkServerErrorCode};
use ldk_server_protos::api::{Bolt11ReceiveRequest, Bolt11SendRequest, ListPaymentsRequest};
use ldk_server_protos::types::{
    Bolt11InvoiceDescription, Payment, PaymentDirection, PaymentStatus as LdkPaymentStatus,
    bolt11_invoice_description, payment_kind,
};

use super::invoice::{decode_bolt11, normalize_payment_hash};
use super::{LightningBackend, PaymentStatus, PayoutStatus};
use crate::error::IntegrationError;
use crate::swap::LightningInvoice;

#[derive(Clone)]
pub struct LdkLightningClient {
    client: LdkServerClient,
}

impl LdkLightningClient {
    pub fn new(rest_service_address: String) -> Self {
        Self {
            client: LdkServerClient::new(rest_service_address),
        }
    }

    /// Walks the node's payment history until `matches` finds a payment.
    async fn find_payment<F>(&self, matches: F) -> Result<Option<Payment>, IntegrationError>
    where
        F: FnMut(&Payment) -> bool,
    {
        search_pages(
            |page_token| async move {
                let resp = self
                    .client
                    .list_payments(ListPaymentsRequest { page_token })
                    .await
                    .map_err(|e| classify_error("ListPayments", &e))?;
                Ok((resp.payments, resp.next_page_token))
            },
            matches,
        )
        .await
    }
}

/// Pages through a paginated listing, returning the first item `matches`
/// accepts. Stops when the listing hands back no next-page token.
pub async fn search_pages<T, P, F, Fut, M>(
    mut fetch: F,
    mut matches: M,
) -> Result<Option<T>, IntegrationError>
where
    F: FnMut(Option<P>) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<P>), IntegrationError>>,
    M: FnMut(&T) -> bool,
{
    let mut page_token = None;
    loop {
        let (items, next) = fetch(page_token).await?;
        if let Some(found) = items.into_iter().find(|item| matches(item)) {
            return Ok(Some(found));
        }
        match next {
            Some(next) => page_token = Some(next),
            None => return Ok(None),
        }
    }
}

/// Maps LDK Server failures onto retry semantics: rejected requests and
/// Lightning-level failures are final, server and transport errors are not.
pub fn classify_error(context: &str, err: &LdkServerError) -> IntegrationError {
    let message = format!("{context}: {err}");
    match err.error_code {
        LdkServerErrorCode::InvalidRequestError
        | LdkServerErrorCode::AuthError
        | LdkServerErrorCode::LightningError => IntegrationError::Permanent(message),
        _ => IntegrationError::Transient(message),
    }
}

/// The node refuses to pay an invoice it already has a payment for.
pub fn is_duplicate_payment(err: &LdkServerError) -> bool {
    err.message.to_ascii_lowercase().contains("duplicate")
}

fn bolt11_kind(p: &Payment) -> Option<&payment_kind::Bolt11> {
    match p.kind.as_ref().and_then(|k| k.kind.as_ref()) {
        Some(payment_kind::Kind::Bolt11(b)) => Some(b),
        _ => None,
    }
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(i64::try_from(secs).ok()?, 0)
}

#[async_trait]
impl LightningBackend for LdkLightningClient {
    async fn create_invoice(
        &self,
        amount_sat: u64,
        description: String,
        expiry_secs: u32,
    ) -> Result<LightningInvoice, IntegrationError> {
        let amount_msat = amount_sat
            .checked_mul(1000)
            .ok_or_else(|| IntegrationError::Permanent("invoice amount overflow".into()))?;

        let resp = self
            .client
            .bolt11_receive(Bolt11ReceiveRequest {
                amount_msat: Some(amount_msat),
                description: Some(Bolt11InvoiceDescription {
                    kind: Some(bolt11_invoice_description::Kind::Direct(description.clone())),
                }),
                expiry_secs,
            })
            .await
            .map_err(|e| classify_error("Bolt11Receive", &e))?;

        let decoded = decode_bolt11(&resp.invoice)
            .map_err(|e| IntegrationError::Permanent(format!("node returned bad invoice: {e:#}")))?;

        Ok(LightningInvoice {
            payment_request: resp.invoice,
            payment_hash: decoded.payment_hash_hex(),
            amount: amount_sat,
            expires_at: decoded.expires_at,
            description: Some(description),
        })
    }

    async fn payment_status(&self, payment_hash: &str) -> Result<PaymentStatus, IntegrationError> {
        let wanted = normalize_payment_hash(payment_hash);
        let found = self
            .find_payment(|p| {
                p.direction == PaymentDirection::Inbound as i32
                    && bolt11_kind(p).is_some_and(|b| normalize_payment_hash(&b.hash) == wanted)
            })
            .await?;

        let Some(p) = found else {
            return Ok(PaymentStatus::unpaid());
        };
        if p.status != LdkPaymentStatus::Succeeded as i32 {
            return Ok(PaymentStatus::unpaid());
        }

        Ok(PaymentStatus {
            is_paid: true,
            paid_at: timestamp(p.latest_update_timestamp),
            amount_sat: p.amount_msat.map(|msat| msat / 1000),
            payment_id: Some(p.id),
        })
    }

    async fn pay_invoice(
        &self,
        bolt11: &str,
        amount_sat: Option<u64>,
    ) -> Result<String, IntegrationError> {
        let err = match self
            .client
            .bolt11_send(Bolt11SendRequest {
                invoice: bolt11.to_string(),
                amount_msat: amount_sat.map(|sat| sat.saturating_mul(1000)),
                route_parameters: None,
            })
            .await
        {
            Ok(resp) => return Ok(resp.payment_id),
            Err(err) => err,
        };
        if !is_duplicate_payment(&err) {
            return Err(classify_error("Bolt11Send", &err));
        }

        // An earlier attempt reached the node; report that payment instead.
        let wanted = decode_bolt11(bolt11)
            .map_err(|e| IntegrationError::Permanent(format!("decode payout invoice: {e:#}")))?
            .payment_hash_hex();
        let existing = self
            .find_payment(|p| {
                p.direction == PaymentDirection::Outbound as i32
                    && bolt11_kind(p).is_some_and(|b| normalize_payment_hash(&b.hash) == wanted)
            })
            .await?;
        match existing {
            Some(p) => {
                tracing::info!(payment_id = %p.id, "payout already sent, reusing payment");
                Ok(p.id)
            }
            None => Err(classify_error("Bolt11Send", &err)),
        }
    }

    async fn payout_status(&self, payment_id: &str) -> Result<PayoutStatus, IntegrationError> {
        let Some(p) = self
            .find_payment(|p| p.id == payment_id && p.direction == PaymentDirection::Outbound as i32)
            .await?
        else {
            return Ok(PayoutStatus::Pending);
        };

        if p.status == LdkPaymentStatus::Failed as i32 {
            return Ok(PayoutStatus::Failed(format!("payment {payment_id} failed")));
        }
        if p.status != LdkPaymentStatus::Succeeded as i32 {
            return Ok(PayoutStatus::Pending);
        }

        let preimage_hex = bolt11_kind(&p)
            .and_then(|b| b.preimage.clone())
            .ok_or_else(|| IntegrationError::Permanent("missing payment preimage".into()))?;
        Ok(PayoutStatus::Succeeded { preimage_hex })
    }
}
