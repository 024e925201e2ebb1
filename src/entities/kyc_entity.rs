use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use surrealdb::sql::{Datetime, Thing};

use crate::database::client::Db;
use crate::entities::user_auth::local_user_entity;
use crate::middleware::ctx::Ctx;
use crate::middleware::error::{AppError, CtxError, CtxResult};
use crate::middleware::utils::db_utils::{get_entity, IdentIdName};

pub const KYC_FEE: i64 = 99;
pub const KYC_FEE_REFERRER_SHARE: i64 = 49;
pub const KYC_DOCUMENT_MAX_BYTES: i64 = 5 * 1024 * 1024;
/// Completion weight of each document type and of the fee payment.
pub const KYC_STEP_PERCENT: i64 = 20;

#[derive(
    Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KycDocumentType {
    IdFront,
    IdBack,
    AddressProof,
    Selfie,
}

#[derive(Display, EnumString, EnumIter, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum KycPaymentStatus {
    Pending,
    Paid,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct KycDocument {
    pub document_type: KycDocumentType,
    pub file_url: String,
    pub file_size: i64,
    pub uploaded_at: Datetime,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Kyc {
    pub id: Thing,
    pub user: Thing,
    pub documents: Vec<KycDocument>,
    pub payment_status: KycPaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_referrer: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<Datetime>,
    pub completion_percent: i64,
}

impl Kyc {
    pub fn empty(user: &Thing) -> Self {
        Kyc {
            id: KycDbService::get_kyc_id(user),
            user: user.clone(),
            documents: vec![],
            payment_status: KycPaymentStatus::Pending,
            fee_amount: None,
            has_referrer: None,
            paid_at: None,
            completion_percent: 0,
        }
    }

    /// Replaces a previous document of the same type.
    pub fn set_document(&mut self, document: KycDocument) {
        self.documents
            .retain(|d| d.document_type != document.document_type);
        self.documents.push(document);
        self.completion_percent = compute_completion_percent(&self.documents, self.payment_status);
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == KycPaymentStatus::Paid
    }
}

pub fn compute_completion_percent(documents: &[KycDocument], payment: KycPaymentStatus) -> i64 {
    let uploaded = KycDocumentType::iter()
        .filter(|t| documents.iter().any(|d| d.document_type == *t))
        .count() as i64;
    let paid = match payment {
        KycPaymentStatus::Paid => 1,
        KycPaymentStatus::Pending => 0,
    };
    (uploaded + paid) * KYC_STEP_PERCENT
}

/// Platform and referrer shares of the fee.
pub fn split_kyc_fee(has_referrer: bool) -> (i64, i64) {
    if has_referrer {
        (KYC_FEE - KYC_FEE_REFERRER_SHARE, KYC_FEE_REFERRER_SHARE)
    } else {
        (KYC_FEE, 0)
    }
}

#[derive(Debug, Serialize)]
struct KycDocumentsMerge {
    user: Thing,
    documents: Vec<KycDocument>,
    completion_percent: i64,
}

pub struct KycDbService<'a> {
    pub db: &'a Db,
    pub ctx: &'a Ctx,
}

pub const TABLE_NAME: &str = "kyc";
const USER_TABLE: &str = local_user_entity::TABLE_NAME;

impl<'a> KycDbService<'a> {
    pub async fn mutate_db(&self) -> Result<(), AppError> {
        let doc_types = KycDocumentType::iter()
            .map(|t| format!("'{t}'"))
            .collect::<Vec<_>>()
            .join(",");
        let payment_statuses = KycPaymentStatus::iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!("
    DEFINE TABLE IF NOT EXISTS {TABLE_NAME} SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS user ON TABLE {TABLE_NAME} TYPE record<{USER_TABLE}>;
    DEFINE FIELD IF NOT EXISTS documents ON TABLE {TABLE_NAME} TYPE array<object> DEFAULT [];
    DEFINE FIELD IF NOT EXISTS documents[*].document_type ON TABLE {TABLE_NAME} TYPE string ASSERT $value INSIDE [{doc_types}];
    DEFINE FIELD IF NOT EXISTS documents[*].file_url ON TABLE {TABLE_NAME} TYPE string;
    DEFINE FIELD IF NOT EXISTS documents[*].file_size ON TABLE {TABLE_NAME} TYPE int ASSERT $value > 0 AND $value <= {KYC_DOCUMENT_MAX_BYTES};
    DEFINE FIELD IF NOT EXISTS documents[*].uploaded_at ON TABLE {TABLE_NAME} TYPE datetime;
    DEFINE FIELD IF NOT EXISTS payment_status ON TABLE {TABLE_NAME} TYPE string DEFAULT 'pending' ASSERT $value INSIDE [{payment_statuses}];
    DEFINE FIELD IF NOT EXISTS fee_amount ON TABLE {TABLE_NAME} TYPE option<int>;
    DEFINE FIELD IF NOT EXISTS has_referrer ON TABLE {TABLE_NAME} TYPE option<bool>;
    DEFINE FIELD IF NOT EXISTS paid_at ON TABLE {TABLE_NAME} TYPE option<datetime>;
    DEFINE FIELD IF NOT EXISTS completion_percent ON TABLE {TABLE_NAME} TYPE int DEFAULT 0;
    DEFINE FIELD IF NOT EXISTS r_updated ON TABLE {TABLE_NAME} TYPE option<datetime> DEFAULT time::now() VALUE time::now();
    ");
        let mutation = self.db.query(sql).await?;
        mutation.check()?;
        Ok(())
    }

    pub fn get_kyc_id(user: &Thing) -> Thing {
        Thing::from((TABLE_NAME.to_string(), user.id.clone()))
    }

    pub async fn get(&self, user: &Thing) -> CtxResult<Option<Kyc>> {
        get_entity::<Kyc>(
            self.db,
            TABLE_NAME.to_string(),
            &IdentIdName::Id(Self::get_kyc_id(user)),
        )
        .await
        .map_err(CtxError::from(self.ctx))
    }

    pub async fn get_or_empty(&self, user: &Thing) -> CtxResult<Kyc> {
        Ok(self.get(user).await?.unwrap_or_else(|| Kyc::empty(user)))
    }

    /// Stores the document list without touching payment fields.
    pub async fn save_documents(&self, kyc: &Kyc) -> CtxResult<Kyc> {
        let data = KycDocumentsMerge {
            user: kyc.user.clone(),
            documents: kyc.documents.clone(),
            completion_percent: kyc.completion_percent,
        };
        let mut res = self
            .db
            .query("UPSERT ONLY $kyc_id MERGE $data;")
            .bind(("kyc_id", kyc.id.clone()))
            .bind(("data", data))
            .await
            .map_err(CtxError::from(self.ctx))?;
        let saved: Option<Kyc> = res.take(0).map_err(CtxError::from(self.ctx))?;
        saved.ok_or_else(|| {
            self.ctx.to_ctx_error(AppError::Generic {
                description: "kyc not saved".to_string(),
            })
        })
    }
}
