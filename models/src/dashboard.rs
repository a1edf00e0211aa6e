use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, ToSchema)]
pub struct Dashboard {
    pub total_count: u32,
    pub in_school_count: u32,
    pub out_school_count: u32,
    pub mismatch_count: u32,
    pub active_security_count: u32,
}
