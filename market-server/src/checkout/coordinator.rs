//! Order Creation Coordinator
//!
//! Drives the no-oversell checkout path:
//!
//! 1. Validate every line read-only and capture unit prices.
//! 2. Reserve line by line through the ledger's conditional decrement.
//! 3. On any failure, release the reservations already applied, newest
//!    first, and fail the whole order.
//! 4. On success, persist the order, clear the cart, then notify.
//!
//! Notifications always come after the committed write. A client that
//! hears nothing may miss a sale; a client that hears a phantom update
//! sees state the ledger never held.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::models::{Order, OrderLine, OrderStatus};
use shared::util::now_millis;
use shared::{AppError, AppResult, ErrorCode};

use crate::db::repository::{OrderRepository, ProductRepository, RepoError};
use crate::message::dispatcher::{BroadcastDispatcher, MutationEvent};
use crate::message::handler::map_repo_error;

/// One requested order line
#[derive(Debug, Clone)]
pub struct LineRequest {
    pub product_id: String,
    pub quantity: i64,
}

/// An order as requested by a buyer
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub user_id: String,
    pub lines: Vec<LineRequest>,
}

/// A successfully applied reservation, kept for compensation
struct AppliedReservation {
    product_id: String,
    quantity: i64,
    /// Stock level right after the decrement
    stock_after: i64,
}

pub struct CheckoutCoordinator {
    products: ProductRepository,
    orders: OrderRepository,
    dispatcher: Arc<BroadcastDispatcher>,
    /// Budget for the reserve + persist section
    timeout: Duration,
}

impl CheckoutCoordinator {
    pub fn new(
        products: ProductRepository,
        orders: OrderRepository,
        dispatcher: Arc<BroadcastDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            products,
            orders,
            dispatcher,
            timeout,
        }
    }

    /// Create an order, reserving stock for every line or for none.
    pub async fn place_order(&self, request: OrderRequest) -> AppResult<Order> {
        let lines = self.validate(&request).await?;
        let deadline = Instant::now() + self.timeout;

        // Reserve phase. Track what has been applied so any failure can
        // unwind it.
        let mut applied: Vec<AppliedReservation> = Vec::with_capacity(lines.len());
        for line in &lines {
            if Instant::now() >= deadline {
                self.compensate(&applied, &request.user_id).await;
                return Err(AppError::new(ErrorCode::CheckoutTimeout));
            }

            match self
                .products
                .reserve(&line.product_id, line.quantity, &request.user_id)
                .await
            {
                Ok(stock_after) => applied.push(AppliedReservation {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    stock_after,
                }),
                Err(RepoError::Conflict(reason)) => {
                    tracing::info!(
                        user_id = %request.user_id,
                        product_id = %line.product_id,
                        %reason,
                        "Reservation lost, unwinding order"
                    );
                    self.compensate(&applied, &request.user_id).await;
                    return Err(AppError::stock_conflict());
                }
                Err(e) => {
                    self.compensate(&applied, &request.user_id).await;
                    return Err(map_repo_error(e));
                }
            }
        }

        // Persist phase
        let order = Order {
            id: None,
            user_id: request.user_id.clone(),
            total: Order::compute_total(&lines),
            lines,
            status: OrderStatus::Pending,
            created_at: now_millis(),
        };

        let order = match self.orders.create(order).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(user_id = %request.user_id, error = %e, "Order persist failed, unwinding");
                self.compensate(&applied, &request.user_id).await;
                return Err(map_repo_error(e));
            }
        };

        // Cart cleanup is best effort: the order is already committed
        if let Err(e) = self.orders.clear_cart(&request.user_id).await {
            tracing::warn!(user_id = %request.user_id, error = %e, "Cart clear failed");
        }

        // Notify phase, strictly after the committed write
        for reservation in &applied {
            let event = MutationEvent::stock_change(
                &reservation.product_id,
                reservation.stock_after + reservation.quantity,
                reservation.stock_after,
            );
            self.dispatcher.on_mutation(&event).await;
        }

        tracing::info!(
            user_id = %request.user_id,
            order_id = %order.id.as_deref().unwrap_or("?"),
            total = %order.total,
            "Order placed"
        );
        Ok(order)
    }

    /// Cancel a pending order, restoring exactly the reserved quantities.
    pub async fn cancel_order(&self, order_id: &str) -> AppResult<Order> {
        let order = self
            .orders
            .find_by_id(order_id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| AppError::with_message(ErrorCode::OrderNotFound, format!("Order {} not found", order_id)))?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::with_message(
                ErrorCode::OrderNotPending,
                format!("Order is {:?}, only pending orders can be cancelled", order.status),
            ));
        }

        self.orders
            .set_status(order_id, OrderStatus::Cancelled)
            .await
            .map_err(map_repo_error)?;

        // Release the quantities the order recorded, never current catalog
        // state, so repeated price/stock edits cannot skew the restore.
        for line in &order.lines {
            match self
                .products
                .release(&line.product_id, line.quantity, "cancellation", &order.user_id)
                .await
            {
                Ok(stock_after) => {
                    let event = MutationEvent::stock_change(
                        &line.product_id,
                        stock_after - line.quantity,
                        stock_after,
                    );
                    self.dispatcher.on_mutation(&event).await;
                }
                Err(e) => {
                    // Product may have been delisted since; the remaining
                    // lines still get their stock back.
                    tracing::error!(
                        order_id = %order_id,
                        product_id = %line.product_id,
                        error = %e,
                        "Release failed during cancellation"
                    );
                }
            }
        }

        let mut cancelled = order;
        cancelled.status = OrderStatus::Cancelled;
        tracing::info!(order_id = %order_id, "Order cancelled");
        Ok(cancelled)
    }

    /// Read-only validation; captures the unit price for each line.
    async fn validate(&self, request: &OrderRequest) -> AppResult<Vec<OrderLine>> {
        if request.user_id.trim().is_empty() {
            return Err(AppError::validation("user_id is required"));
        }
        if request.lines.is_empty() {
            return Err(AppError::new(ErrorCode::OrderEmpty));
        }

        // Merge duplicate product lines so the ledger sees one decrement
        // per product.
        let mut merged: Vec<LineRequest> = Vec::new();
        for line in &request.lines {
            if line.quantity < 1 {
                return Err(AppError::validation(format!(
                    "Quantity for {} must be at least 1",
                    line.product_id
                ))
                .with_detail("product_id", line.product_id.clone()));
            }
            match merged.iter_mut().find(|l| l.product_id == line.product_id) {
                Some(existing) => existing.quantity += line.quantity,
                None => merged.push(line.clone()),
            }
        }

        let mut lines = Vec::with_capacity(merged.len());
        for line in &merged {
            let product = self
                .products
                .find_by_id(&line.product_id)
                .await
                .map_err(map_repo_error)?
                .ok_or_else(|| AppError::product_not_found(&line.product_id))?;

            if !product.is_active {
                return Err(AppError::with_message(
                    ErrorCode::ProductInactive,
                    format!("Product {} is not available", line.product_id),
                ));
            }

            lines.push(OrderLine {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                // Price captured here; later repricings do not move it
                unit_price: product.price,
            });
        }
        Ok(lines)
    }

    /// Undo applied reservations, newest first.
    async fn compensate(&self, applied: &[AppliedReservation], actor: &str) {
        for reservation in applied.iter().rev() {
            if let Err(e) = self
                .products
                .release(
                    &reservation.product_id,
                    reservation.quantity,
                    "release",
                    actor,
                )
                .await
            {
                // Nothing left to do but log; reconciliation and the admin
                // feed make the discrepancy visible.
                tracing::error!(
                    product_id = %reservation.product_id,
                    quantity = reservation.quantity,
                    error = %e,
                    "Compensation release failed"
                );
            }
        }
    }
}
