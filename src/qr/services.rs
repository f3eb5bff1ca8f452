use std::io::Cursor;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use tracing::{info, instrument};
use uuid::Uuid;

use super::dto::QrCodeResponse;
use crate::{
    auth::{
        claims::Identity,
        extractors::AuthUser,
        policy::{authorize, Action},
    },
    errors::AppError,
    state::AppState,
    users::{
        repo_types::User,
        services::{load_authorized, user_not_found},
    },
};

const MODULE_PX: u32 = 10;
const BORDER_MODULES: u32 = 5;

pub fn qr_claims(user: &User) -> String {
    format!("USER:{}|EMAIL:{}|ROLE:{}", user.id, user.email, user.role)
}

/// Renders `claims` as a black-on-white PNG QR code and returns it base64
/// encoded. Level, module size and the 5-module border are fixed, so equal
/// input always yields equal bytes.
pub fn encode(claims: &str) -> anyhow::Result<String> {
    let code = QrCode::with_error_correction_level(claims.as_bytes(), EcLevel::M)
        .context("build qr code")?;
    let symbol = code
        .render::<Luma<u8>>()
        .quiet_zone(false)
        .module_dimensions(MODULE_PX, MODULE_PX)
        .build();

    // drawn here; the renderer's quiet zone is fixed at 4 modules
    let border = i64::from(BORDER_MODULES * MODULE_PX);
    let side = symbol.width() + 2 * BORDER_MODULES * MODULE_PX;
    let mut img = GrayImage::from_pixel(side, side, Luma([255u8]));
    imageops::replace(&mut img, &symbol, border, border);

    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut png, ImageFormat::Png)
        .context("encode qr png")?;
    Ok(STANDARD.encode(png.into_inner()))
}

/// Encodes the caller's own claims and caches the image on their record.
#[instrument(skip_all, fields(user_id = %auth.identity.id))]
pub async fn generate_own(state: &AppState, auth: &AuthUser) -> Result<QrCodeResponse, AppError> {
    authorize(&auth.identity, Action::GenerateOwnQr)?;

    let data = qr_claims(&auth.user);
    let qr_code_base64 = encode(&data)?;

    if !state
        .store
        .update_qr_code(auth.user.id, &qr_code_base64)
        .await?
    {
        return Err(user_not_found());
    }

    info!("qr code generated");
    Ok(QrCodeResponse {
        user_id: auth.user.id,
        qr_code_base64,
        data,
    })
}

/// Returns the cached QR image of `target`.
#[instrument(skip(state))]
pub async fn stored_for(
    state: &AppState,
    actor: &Identity,
    target: Uuid,
) -> Result<QrCodeResponse, AppError> {
    let user = load_authorized(state, actor, target, Action::ReadQr).await?;
    let data = qr_claims(&user);
    let qr_code_base64 = user
        .qr_code
        .ok_or_else(|| AppError::NotFound("QR code not generated for this user".into()))?;

    Ok(QrCodeResponse {
        user_id: user.id,
        qr_code_base64,
        data,
    })
}
