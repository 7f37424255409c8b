//! Request handler definitions
//!
//! Define each route and its handler here. Handlers stay thin: they extract the caller and the request, hand both to
//! [`OrderFlowApi`] and serialise whatever comes back. Business rules, including who may do what, live in the engine.
//!
//! Every handler is async. The order flows await the database and, for external payments, the payment gateway, so a
//! handler never blocks its worker thread.
//!
//! | Method | Path                                                   | Caller                 |
//! |--------|--------------------------------------------------------|------------------------|
//! | GET    | `/health`                                              | anyone                 |
//! | POST   | `/api/v1/orders`                                       | user                   |
//! | GET    | `/api/v1/orders/{id}`                                  | owner or admin         |
//! | GET    | `/api/v1/orders/{id}/payment-status`                   | owner or admin         |
//! | POST   | `/api/v1/orders/{id}/cancel`                           | owner or admin         |
//! | POST   | `/api/v1/orders/{id}/mark-paid`                        | admin                  |
//! | POST   | `/api/v1/orders/{id}/refund`                           | admin                  |
//! | POST   | `/api/v1/orders/{id}/payments/{payment_id}/reconcile`  | admin                  |
//! | POST   | `/api/v1/payments/webhook/{channel}`                   | gateway, signed body   |
use std::collections::HashMap;

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use billing_engine::{
    gateway::HttpTransport,
    order_objects::{CancelOrderRequest, CreateOrderRequest, MarkPaidRequest, RefundRequest},
    BillingDatabase,
    OrderFlowApi,
};
use bytes::Bytes;
use log::*;
use serde_json::json;

use crate::{auth::AuthenticatedCaller, errors::ServerError};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

/// Registers the `/api/v1` routes for an order flow API over `B` and `T`.
pub fn configure_api<B, T>(cfg: &mut web::ServiceConfig)
where
    B: BillingDatabase + 'static,
    T: HttpTransport + 'static,
{
    cfg.service(
        web::scope("/api/v1")
            .service(CreateOrderRoute::<B, T>::new())
            .service(OrderDetailRoute::<B, T>::new())
            .service(PaymentStatusRoute::<B, T>::new())
            .service(CancelOrderRoute::<B, T>::new())
            .service(MarkPaidRoute::<B, T>::new())
            .service(RefundRoute::<B, T>::new())
            .service(ReconcileRoute::<B, T>::new())
            .service(PaymentWebhookRoute::<B, T>::new()),
    );
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(create_order => Post "/orders" impl BillingDatabase, HttpTransport);
/// Creates an order for the authenticated user.
///
/// The idempotency key may be given in the body or in the `Idempotency-Key` header; the body wins. A request that
/// repeats a key the user has already used returns the original order with `200 OK` instead of `201 Created`.
pub async fn create_order<B, T>(
    req: HttpRequest,
    caller: AuthenticatedCaller,
    api: web::Data<OrderFlowApi<B, T>>,
    body: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let mut request = body.into_inner();
    if request.idempotency_key.is_none() {
        request.idempotency_key =
            req.headers().get(IDEMPOTENCY_KEY_HEADER).and_then(|v| v.to_str().ok()).map(|s| s.trim().to_string());
    }
    debug!("💻️ POST order for user {}, plan {}", caller.0.user_id, request.plan_id);
    let result = api.create_order(&caller.0, request).await?;
    if result.replayed {
        Ok(HttpResponse::Ok().json(result))
    } else {
        Ok(HttpResponse::Created().json(result))
    }
}

route!(order_detail => Get "/orders/{id}" impl BillingDatabase, HttpTransport);
pub async fn order_detail<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let order_id = path.into_inner();
    debug!("💻️ GET order {order_id} for user {}", caller.0.user_id);
    let detail = api.order_detail(&caller.0, order_id).await?;
    Ok(HttpResponse::Ok().json(detail))
}

route!(payment_status => Get "/orders/{id}/payment-status" impl BillingDatabase, HttpTransport);
pub async fn payment_status<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let order_id = path.into_inner();
    trace!("💻️ GET payment status of order {order_id}");
    let view = api.payment_status(&caller.0, order_id).await?;
    Ok(HttpResponse::Ok().json(view))
}

route!(cancel_order => Post "/orders/{id}/cancel" impl BillingDatabase, HttpTransport);
/// Cancels an order. The body, `{"reason": "..."}`, is optional.
pub async fn cancel_order<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, T>>,
    body: Option<web::Json<CancelOrderRequest>>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let order_id = path.into_inner();
    debug!("💻️ POST cancel order {order_id} by user {}", caller.0.user_id);
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let order = api.cancel_order(&caller.0, order_id, request).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(mark_paid => Post "/orders/{id}/mark-paid" impl BillingDatabase, HttpTransport);
pub async fn mark_paid<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, T>>,
    body: Option<web::Json<MarkPaidRequest>>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let order_id = path.into_inner();
    debug!("💻️ POST mark order {order_id} paid by user {}", caller.0.user_id);
    let request = body.map(|b| b.into_inner()).unwrap_or_default();
    let result = api.mark_paid(&caller.0, order_id, request).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(refund => Post "/orders/{id}/refund" impl BillingDatabase, HttpTransport);
pub async fn refund<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B, T>>,
    body: web::Json<RefundRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let order_id = path.into_inner();
    let request = body.into_inner();
    debug!("💻️ POST refund of {} on order {order_id} by user {}", request.amount_cents, caller.0.user_id);
    let result = api.refund(&caller.0, order_id, request).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(reconcile => Post "/orders/{id}/payments/{payment_id}/reconcile" impl BillingDatabase, HttpTransport);
pub async fn reconcile<B, T>(
    caller: AuthenticatedCaller,
    path: web::Path<(i64, i64)>,
    api: web::Data<OrderFlowApi<B, T>>,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let (order_id, payment_id) = path.into_inner();
    debug!("💻️ POST reconcile payment {payment_id} of order {order_id}");
    let result = api.reconcile(&caller.0, order_id, payment_id).await?;
    Ok(HttpResponse::Ok().json(result))
}

route!(payment_webhook => Post "/payments/webhook/{channel}" impl BillingDatabase, HttpTransport);
/// Gateway notifications. There is no bearer token: the raw body is authenticated against the channel's webhook
/// signature settings before it is parsed, so it is taken as bytes rather than JSON.
pub async fn payment_webhook<B, T>(
    req: HttpRequest,
    path: web::Path<String>,
    api: web::Data<OrderFlowApi<B, T>>,
    body: Bytes,
) -> Result<HttpResponse, ServerError>
where
    B: BillingDatabase,
    T: HttpTransport,
{
    let channel = path.into_inner();
    trace!("💻️ Received webhook for channel {channel} ({} bytes)", body.len());
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect::<HashMap<_, _>>();
    let result = api.handle_webhook(&channel, &headers, &body).await?;
    info!(
        "💻️ Webhook from {channel} for order {} processed. Order is {} (changed: {})",
        result.order.id, result.order.status, result.changed
    );
    Ok(HttpResponse::Ok().json(json!({
        "received": true,
        "order_id": result.order.id,
        "payment_id": result.payment.id,
        "changed": result.changed,
    })))
}
