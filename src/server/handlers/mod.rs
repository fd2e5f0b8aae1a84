use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::server::AppState;

mod admin;
mod checkout;
mod cron;
mod me;
mod public;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(public::health))
        .route("/plans", get(public::list_plans))
        // Signed-in user
        .route("/me/account", post(me::ensure_account))
        .route("/me/balance", get(me::get_balance))
        .route("/me/subscription", get(me::get_subscription))
        .route("/me/subscription/cancel", post(me::cancel_subscription))
        .route("/me/transactions", get(me::list_transactions))
        .route("/me/credits/spend", post(me::spend_credits))
        .route("/me/payments", get(checkout::list_payments))
        .route("/checkout/pix", post(checkout::create_pix))
        .route("/checkout/{payment_id}", get(checkout::payment_status))
        // Service secret
        .route(
            "/cron/renewal",
            get(cron::run_renewal).post(cron::run_renewal),
        )
        .route("/admin/users/{user_id}/plan", post(admin::set_user_plan))
        .route("/admin/users/{user_id}/credits", post(admin::grant_credits))
}
