//! Listing management endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{BookId, Money, UserId};
use ledger::{BookRecord, ConditionGrade, LedgerStore};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

use super::{AppState, parse_uuid};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateBookRequest {
    pub isbn: String,
    pub title: String,
    pub condition: ConditionGrade,
    pub price_cents: i64,
    pub seller_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct BookResponse {
    pub id: String,
    pub isbn: String,
    pub title: String,
    pub condition: ConditionGrade,
    pub price_cents: i64,
    pub seller_id: String,
    pub status: ledger::BookStatus,
}

impl From<&BookRecord> for BookResponse {
    fn from(book: &BookRecord) -> Self {
        Self {
            id: book.id.to_string(),
            isbn: book.isbn.clone(),
            title: book.title.clone(),
            condition: book.condition,
            price_cents: book.price.cents(),
            seller_id: book.seller_id.to_string(),
            status: book.status,
        }
    }
}

// -- Handlers --

/// POST /books — publish a new listing.
#[tracing::instrument(skip(state, req))]
pub async fn create<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(req): Json<CreateBookRequest>,
) -> Result<(axum::http::StatusCode, Json<BookResponse>), ApiError> {
    let seller_id = match &req.seller_id {
        Some(id) => UserId::from_uuid(parse_uuid(id, "seller_id")?),
        None => UserId::new(),
    };

    let book = state
        .engine
        .list_book(
            req.isbn,
            req.title,
            req.condition,
            Money::from_cents(req.price_cents),
            seller_id,
        )
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?;

    Ok((axum::http::StatusCode::CREATED, Json((&book).into())))
}

/// GET /books/{id} — load a listing by ID.
#[tracing::instrument(skip(state))]
pub async fn get<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<BookResponse>, ApiError> {
    let book_id = BookId::from_uuid(parse_uuid(&id, "book id")?);

    let book = state
        .engine
        .book(book_id)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Book {id} not found")))?;

    Ok(Json((&book).into()))
}

/// POST /books/{id}/withdraw — soft-delete a listed book.
#[tracing::instrument(skip(state))]
pub async fn withdraw<L: LedgerStore + Clone + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<BookResponse>, ApiError> {
    let book_id = BookId::from_uuid(parse_uuid(&id, "book id")?);

    state
        .engine
        .withdraw_book(book_id)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?;

    let book = state
        .engine
        .book(book_id)
        .await
        .map_err(|err| ApiError::Engine {
            err,
            order_state: None,
        })?
        .ok_or_else(|| ApiError::NotFound(format!("Book {id} not found")))?;

    Ok(Json((&book).into()))
}
