use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct QrCodeResponse {
    pub user_id: Uuid,
    pub qr_code_base64: String,
    pub data: String, // the encoded claims string
}
