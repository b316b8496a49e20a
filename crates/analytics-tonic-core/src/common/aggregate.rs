//! Order aggregation shared by every server variant.
//!
//! The aggregation is pure: no I/O, no shared state, and no failure path. Only
//! orders whose status is [`OrderStatus::Completed`] contribute. Arithmetic
//! wraps instead of panicking, so malformed input (negative prices or
//! quantities, absurd totals) produces a result rather than an error.

use crate::{
    proto::{AggregateResult, Order, OrderStatus},
    types::CLIENT_ID_HEADER,
};
use tonic::metadata::MetadataMap;

/// Aggregates `orders` into a fresh [`AggregateResult`].
///
/// `echoed_client_id` is left empty; callers copy it from request metadata
/// with [`client_id`].
pub fn aggregate(orders: &[Order]) -> AggregateResult {
    let mut reply = AggregateResult::default();
    aggregate_into(orders, &mut reply);
    reply
}

/// Aggregates `orders` into an existing reply buffer.
///
/// Counts and totals are added to whatever `reply` already holds, which lets a
/// call reuse a reply buffer that has been populated with other fields.
pub fn aggregate_into(orders: &[Order], reply: &mut AggregateResult) {
    for order in orders {
        if order.status() != OrderStatus::Completed {
            continue;
        }
        reply.processed_orders = reply.processed_orders.wrapping_add(1);

        let mut order_amount = 0_i64;
        for item in &order.items {
            order_amount =
                order_amount.wrapping_add(item.price_cents.wrapping_mul(i64::from(item.quantity)));

            let quantity = reply
                .quantity_by_category
                .entry(item.category.clone())
                .or_insert(0);
            *quantity = quantity.wrapping_add(item.quantity);
        }

        let amount = reply
            .amount_by_country
            .entry(order.country.clone())
            .or_insert(0);
        *amount = amount.wrapping_add(order_amount);
    }
}

/// Returns the `x-client-id` metadata value, if present.
///
/// The value is copied byte-for-byte; bytes that are not valid UTF-8 are
/// replaced rather than rejected.
pub fn client_id(metadata: &MetadataMap) -> Option<String> {
    metadata
        .get(CLIENT_ID_HEADER)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::OrderItem;

    fn item(category: &str, price_cents: i64, quantity: i32) -> OrderItem {
        OrderItem {
            category: category.to_string(),
            price_cents,
            quantity,
        }
    }

    fn order(status: OrderStatus, country: &str, items: Vec<OrderItem>) -> Order {
        Order {
            id: String::new(),
            status: status as i32,
            country: country.to_string(),
            items,
        }
    }

    #[test]
    fn completed_order_is_summed_per_country_and_category() {
        let orders = vec![order(
            OrderStatus::Completed,
            "US",
            vec![item("A", 100, 2), item("B", 50, 1)],
        )];

        let reply = aggregate(&orders);

        assert_eq!(reply.processed_orders, 1);
        assert_eq!(reply.amount_by_country.len(), 1);
        assert_eq!(reply.amount_by_country["US"], 250);
        assert_eq!(reply.quantity_by_category.len(), 2);
        assert_eq!(reply.quantity_by_category["A"], 2);
        assert_eq!(reply.quantity_by_category["B"], 1);
        assert!(reply.echoed_client_id.is_empty());
    }

    #[test]
    fn cancelled_order_contributes_nothing() {
        let orders = vec![order(
            OrderStatus::Cancelled,
            "US",
            vec![item("A", 100, 2), item("B", 50, 1)],
        )];

        let reply = aggregate(&orders);

        assert_eq!(reply.processed_orders, 0);
        assert!(reply.amount_by_country.is_empty());
        assert!(reply.quantity_by_category.is_empty());
    }

    #[test]
    fn unknown_status_is_not_completed() {
        let mut unknown = order(OrderStatus::Completed, "FR", vec![item("A", 10, 1)]);
        unknown.status = 42;

        let reply = aggregate(&[unknown]);

        assert_eq!(reply.processed_orders, 0);
        assert!(reply.amount_by_country.is_empty());
    }

    #[test]
    fn totals_match_item_sums_over_mixed_batch() {
        let statuses = [
            OrderStatus::Completed,
            OrderStatus::Pending,
            OrderStatus::Cancelled,
        ];
        let countries = ["US", "DE", "JP", "BR"];
        let categories = ["books", "games", "toys"];

        let mut orders = Vec::new();
        for i in 0..120_i64 {
            let items = (0..(i % 4))
                .map(|j| {
                    item(
                        categories[((i + j) % 3) as usize],
                        (i * 7 + j) % 900,
                        ((i + 3 * j) % 5) as i32,
                    )
                })
                .collect();
            orders.push(order(
                statuses[(i % 3) as usize],
                countries[(i % 4) as usize],
                items,
            ));
        }

        let completed: Vec<&Order> = orders
            .iter()
            .filter(|o| o.status() == OrderStatus::Completed)
            .collect();
        let expected_revenue: i64 = completed
            .iter()
            .flat_map(|o| o.items.iter())
            .map(|it| it.price_cents * i64::from(it.quantity))
            .sum();
        let expected_quantity: i32 = completed
            .iter()
            .flat_map(|o| o.items.iter())
            .map(|it| it.quantity)
            .sum();

        let reply = aggregate(&orders);

        assert_eq!(reply.processed_orders as usize, completed.len());
        assert_eq!(reply.amount_by_country.values().sum::<i64>(), expected_revenue);
        assert_eq!(
            reply.quantity_by_category.values().sum::<i32>(),
            expected_quantity
        );
    }

    #[test]
    fn completed_order_without_items_still_counts() {
        let reply = aggregate(&[order(OrderStatus::Completed, "CA", vec![])]);

        assert_eq!(reply.processed_orders, 1);
        assert_eq!(reply.amount_by_country["CA"], 0);
        assert!(reply.quantity_by_category.is_empty());
    }

    #[test]
    fn negative_quantities_are_taken_as_given() {
        let reply = aggregate(&[order(
            OrderStatus::Completed,
            "US",
            vec![item("A", 100, -3), item("A", 10, 1)],
        )]);

        assert_eq!(reply.amount_by_country["US"], -290);
        assert_eq!(reply.quantity_by_category["A"], -2);
    }

    #[test]
    fn overflow_wraps_instead_of_panicking() {
        let reply = aggregate(&[order(
            OrderStatus::Completed,
            "US",
            vec![item("A", i64::MAX, 2)],
        )]);

        assert_eq!(reply.amount_by_country["US"], i64::MAX.wrapping_mul(2));
    }

    #[test]
    fn aggregate_into_keeps_existing_fields() {
        let mut reply = AggregateResult {
            echoed_client_id: "client-7".to_string(),
            ..Default::default()
        };

        aggregate_into(
            &[order(OrderStatus::Completed, "US", vec![item("A", 5, 4)])],
            &mut reply,
        );

        assert_eq!(reply.echoed_client_id, "client-7");
        assert_eq!(reply.amount_by_country["US"], 20);
    }

    #[test]
    fn client_id_is_copied_verbatim() {
        let mut metadata = MetadataMap::new();
        metadata.insert(CLIENT_ID_HEADER, "bench-worker-0042".parse().unwrap());

        assert_eq!(client_id(&metadata).as_deref(), Some("bench-worker-0042"));
    }

    #[test]
    fn missing_client_id_is_none() {
        let metadata = MetadataMap::new();
        assert_eq!(client_id(&metadata), None);
    }
}
