//! Load generator that posts randomly generated orders to a running server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{ContextError, ExecutionContext};
use domain::{CreateOrderInput, CreateOrderItemInput};
use fake::Fake;
use fake::faker::name::en::Name;
use order_store::Money;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Order endpoint of a server started with the default configuration.
pub const DEFAULT_TARGET: &str = "http://localhost:3000/api/v1/orders";

/// Upper bound for a whole run.
pub const TOTAL_TIMEOUT: Duration = Duration::from_secs(60);

/// Upper bound for a single request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const PRODUCTS: [&str; 6] = [
    "Widget",
    "Gadget",
    "Thingamajig",
    "Doodad",
    "Gizmo",
    "Contraption",
];

/// Options of the `stress-test` subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct StressTestArgs {
    /// Total number of orders to create
    #[arg(long = "num", default_value_t = 1000)]
    pub num_orders: usize,

    /// Number of orders per batch
    #[arg(long = "batch", default_value_t = 100, value_parser = at_least_one)]
    pub batch_size: usize,

    /// Number of requests in flight at once
    #[arg(long, default_value_t = 10, value_parser = at_least_one)]
    pub concurrency: usize,

    /// Target order endpoint
    #[arg(long, default_value = DEFAULT_TARGET)]
    pub url: String,
}

fn at_least_one(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StressSummary {
    /// Orders the run was asked to create.
    pub requested: usize,
    /// Requests actually dispatched before the run ended.
    pub dispatched: usize,
    pub succeeded: usize,
    /// Failed requests plus orders never dispatched.
    pub failed: usize,
    pub duration: Duration,
}

#[derive(Debug, Error)]
enum SendError {
    #[error("request aborted: {0}")]
    Aborted(#[from] ContextError),

    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned non-2xx status: {status} - {body}")]
    Status { status: u16, body: String },
}

/// Generates `count` orders with one to three random line items each.
pub fn generate_orders(count: usize) -> Vec<CreateOrderInput> {
    let mut rng = rand::rng();
    let mut orders = Vec::with_capacity(count);

    for _ in 0..count {
        let item_count = rng.random_range(1..=3);
        let mut items = Vec::with_capacity(item_count);
        for _ in 0..item_count {
            items.push(CreateOrderItemInput {
                product_name: PRODUCTS[rng.random_range(0..PRODUCTS.len())].to_string(),
                quantity: rng.random_range(1..=5),
                price: Money::from_cents(rng.random_range(1_000..=9_999)),
            });
        }

        orders.push(CreateOrderInput {
            customer_name: Name().fake(),
            items,
        });
    }
    orders
}

/// Posts `args.num_orders` generated orders to `args.url`, batch by batch, with
/// at most `args.concurrency` requests in flight.
///
/// Orders not yet dispatched when `ctx` ends are counted as failed.
pub async fn run(
    args: &StressTestArgs,
    ctx: &ExecutionContext,
) -> Result<StressSummary, reqwest::Error> {
    tracing::info!(
        num_orders = args.num_orders,
        batch_size = args.batch_size,
        concurrency = args.concurrency,
        url = %args.url,
        "starting stress test"
    );

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(500)
        .build()?;

    let orders = generate_orders(args.num_orders);
    let batch_size = args.batch_size.max(1);
    tracing::info!(
        orders = orders.len(),
        batches = orders.len().div_ceil(batch_size),
        "generated orders"
    );

    let semaphore = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let started = Instant::now();
    let mut dispatched = 0;

    for (index, order) in orders.into_iter().enumerate() {
        if index % batch_size == 0 {
            tracing::debug!(batch = index / batch_size + 1, "dispatching batch");
        }

        let permit = match ctx.run(semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, dispatched, "stress test stopped early");
                break;
            }
        };
        dispatched += 1;

        let client = client.clone();
        let url = args.url.clone();
        let ctx = ctx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match send_order(&client, &ctx, &url, &order).await {
                Ok(()) => {
                    tracing::debug!(order = index + 1, "order sent");
                    true
                }
                Err(e) => {
                    tracing::warn!(order = index + 1, error = %e, "order failed");
                    false
                }
            }
        });
    }

    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => succeeded += 1,
            Ok(false) => {}
            Err(e) => tracing::error!(error = %e, "request task failed"),
        }
    }

    let summary = StressSummary {
        requested: args.num_orders,
        dispatched,
        succeeded,
        failed: args.num_orders - succeeded,
        duration: started.elapsed(),
    };
    tracing::info!(
        requested = summary.requested,
        succeeded = summary.succeeded,
        failed = summary.failed,
        duration_ms = summary.duration.as_millis() as u64,
        "stress test finished"
    );
    Ok(summary)
}

async fn send_order(
    client: &reqwest::Client,
    ctx: &ExecutionContext,
    url: &str,
    order: &CreateOrderInput,
) -> Result<(), SendError> {
    let response = ctx.run(client.post(url).json(order).send()).await??;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = ctx.run(response.text()).await?.unwrap_or_default();
    Err(SendError::Status {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_orders_pass_validation() {
        let orders = generate_orders(200);
        assert_eq!(orders.len(), 200);

        for order in &orders {
            assert_eq!(order.validate(), Ok(()));
            assert!((1..=3).contains(&order.items.len()));
            for item in &order.items {
                assert!(PRODUCTS.contains(&item.product_name.as_str()));
                assert!((1..=5).contains(&item.quantity));
                assert!((1_000..=9_999).contains(&item.price.cents()));
            }
        }
    }

    #[test]
    fn batch_and_concurrency_must_be_positive() {
        assert_eq!(at_least_one("4"), Ok(4));
        assert!(at_least_one("0").is_err());
        assert!(at_least_one("-1").is_err());
    }
}
