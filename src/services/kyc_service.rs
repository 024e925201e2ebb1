use chrono::Utc;
use serde::{Deserialize, Serialize};
use surrealdb::sql::{Datetime, Thing};
use tracing::{info, warn};
use validator::Validate;

use crate::{
    database::{
        client::Db,
        surrdb_utils::{run_transaction, throw_stmt, with_tx_retries, TransactionQry, THROW_INVALID_STATE},
    },
    entities::{
        kyc_entity::{
            split_kyc_fee, Kyc, KycDbService, KycDocument, KycDocumentType, KycPaymentStatus,
            KYC_DOCUMENT_MAX_BYTES, KYC_FEE, KYC_STEP_PERCENT,
        },
        user_auth::local_user_entity::{LocalUser, LocalUserDbService},
        wallet::{
            balance_transaction_entity::{
                BalanceTransactionDbService, LedgerEntrySpec, TransactionCategory, WalletDelta,
            },
            wallet_entity::{WalletDbService, PLATFORM_WALLET},
        },
    },
    middleware::{
        ctx::Ctx,
        error::{AppError, AppResult, CtxError, CtxResult},
        utils::db_utils::record_exists,
    },
};

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct KycUpdateInput {
    pub document_type: Option<KycDocumentType>,
    #[validate(url(message = "file_url must be a url"))]
    pub file_url: Option<String>,
    pub file_size: Option<i64>,
    pub payment_status: Option<String>,
}

/// Fee event written by [`KycService::charge_fee`].
#[derive(Debug, Deserialize, Serialize)]
pub struct KycFeeCharge {
    pub kyc: Kyc,
    pub platform_amount: i64,
    pub referrer_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<Thing>,
}

pub struct KycService<'a> {
    db: &'a Db,
    ctx: &'a Ctx,
    tx_retries: u8,
    kyc_repository: KycDbService<'a>,
    users_repository: LocalUserDbService<'a>,
}

impl<'a> KycService<'a> {
    pub fn new(db: &'a Db, ctx: &'a Ctx, tx_retries: u8) -> Self {
        Self {
            db,
            ctx,
            tx_retries,
            kyc_repository: KycDbService { db, ctx },
            users_repository: LocalUserDbService { db, ctx },
        }
    }

    pub async fn get(&self) -> CtxResult<Kyc> {
        let user = self.users_repository.get_ctx_user().await?;
        self.kyc_repository.get_or_empty(&user.id).await
    }

    /// Stores one document or, with `payment_status = "paid"`, charges the fee.
    pub async fn update(&self, input: KycUpdateInput) -> CtxResult<Kyc> {
        input.validate().map_err(CtxError::from(self.ctx))?;
        let user = self.users_repository.get_ctx_user().await?;

        if let Some(status) = input.payment_status.as_deref() {
            if status != KycPaymentStatus::Paid.to_string() {
                return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                    description: format!("payment_status can only be set to paid, got {status}"),
                }));
            }
            return Ok(self.charge_fee(&user).await?.kyc);
        }

        let document = match (input.document_type, input.file_url, input.file_size) {
            (Some(document_type), Some(file_url), Some(file_size)) => {
                validate_document_size(file_size).map_err(CtxError::from(self.ctx))?;
                KycDocument {
                    document_type,
                    file_url,
                    file_size,
                    uploaded_at: Datetime::from(Utc::now()),
                }
            }
            _ => {
                return Err(self.ctx.to_ctx_error(AppError::ValidationError {
                    description: "document_type, file_url and file_size or payment_status required"
                        .to_string(),
                }))
            }
        };

        let mut kyc = self.kyc_repository.get_or_empty(&user.id).await?;
        let document_type = document.document_type;
        kyc.set_document(document);
        let saved = self.kyc_repository.save_documents(&kyc).await?;
        info!(
            user = %user.email,
            document_type = %document_type,
            completion_percent = saved.completion_percent,
            "kyc document stored"
        );
        Ok(saved)
    }

    pub async fn charge_fee(&self, user: &LocalUser) -> CtxResult<KycFeeCharge> {
        with_tx_retries(self.tx_retries, "kyc_charge_fee", || self.charge_fee_once(user))
            .await
            .map_err(CtxError::from(self.ctx))
    }

    async fn charge_fee_once(&self, user: &LocalUser) -> AppResult<KycFeeCharge> {
        let kyc = self.kyc_repository.get_or_empty(&user.id).await?;
        if kyc.is_paid() {
            return Err(AppError::InvalidState {
                description: "KYC fee is already paid".to_string(),
            });
        }

        let referrer = match user.referred_by.as_ref() {
            None => None,
            Some(referrer) if referrer == &user.id => None,
            Some(referrer) => match record_exists(self.db, referrer).await {
                Ok(()) => Some(referrer.clone()),
                Err(AppError::EntityFailIdNotFound { .. }) => {
                    warn!(user = %user.email, referrer = %referrer, "referrer not found, fee goes to platform");
                    None
                }
                Err(err) => return Err(err),
            },
        };
        let has_referrer = referrer.is_some();
        let (platform_amount, referrer_amount) = split_kyc_fee(has_referrer);

        let kyc_id = KycDbService::get_kyc_id(&user.id);
        let actor = user.actor();
        let mut tx = TransactionQry::new();
        tx.bind("kyc_id", kyc_id)
            .bind("user", user.id.clone())
            .bind("has_referrer", has_referrer)
            .push("LET $kyc = UPSERT ONLY $kyc_id SET user = $user;")
            .push(format!(
                "IF $kyc.payment_status = '{}' {{ {} }};",
                KycPaymentStatus::Paid,
                throw_stmt(THROW_INVALID_STATE, "KYC fee is already paid")
            ));

        let platform_delta = WalletDelta::single(
            PLATFORM_WALLET.clone(),
            LedgerEntrySpec::new(TransactionCategory::KycFeePlatform, platform_amount)
                .user(&user.id)
                .has_referrer(has_referrer)
                .description(format!("KYC fee of {}", user.email)),
        );
        tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
            "plt",
            &platform_delta,
            &actor,
        )?);

        if let Some(referrer) = referrer.as_ref() {
            let referrer_delta = WalletDelta::single(
                WalletDbService::get_user_wallet_id(referrer),
                LedgerEntrySpec::new(TransactionCategory::KycFeeReferrer, referrer_amount)
                    .user(&user.id)
                    .has_referrer(true)
                    .description(format!("Referral share of KYC fee of {}", user.email)),
            );
            tx.push_qry(BalanceTransactionDbService::get_wallet_delta_qry(
                "ref",
                &referrer_delta,
                &actor,
            )?);
        }

        tx.push(format!(
            "UPDATE ONLY $kyc_id SET payment_status = '{}', has_referrer = $has_referrer, \
             fee_amount = {KYC_FEE}, paid_at = $event_at, \
             completion_percent = (completion_percent ?? 0) + {KYC_STEP_PERCENT};",
            KycPaymentStatus::Paid
        ));

        let kyc = run_transaction::<Kyc>(self.db, tx)
            .await?
            .ok_or_else(|| AppError::Generic {
                description: "kyc not updated".to_string(),
            })?;
        info!(
            user = %user.email,
            platform_amount,
            referrer_amount,
            has_referrer,
            "kyc fee charged"
        );
        Ok(KycFeeCharge {
            kyc,
            platform_amount,
            referrer_amount,
            referrer,
        })
    }
}

fn validate_document_size(file_size: i64) -> AppResult<()> {
    if file_size <= 0 || file_size > KYC_DOCUMENT_MAX_BYTES {
        return Err(AppError::ValidationError {
            description: format!("file_size must be between 1 and {KYC_DOCUMENT_MAX_BYTES} bytes"),
        });
    }
    Ok(())
}
