//! Row inserts for the tables the engine reads but never creates:
//! products, orders with their items, and carts. Checkout lives upstream;
//! these exist for tests and local development.

use anyhow::{Context, Result};
use sfr_schemas::{InventoryStatus, Order, OrderItem};
use sqlx::PgPool;
use uuid::Uuid;

pub async fn insert_product(pool: &PgPool, name: &str, quantity_on_hand: i32) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let status = if quantity_on_hand > 0 {
        InventoryStatus::Active
    } else {
        InventoryStatus::OutOfStock
    };
    sqlx::query("insert into products (id, name, quantity_on_hand, status) values ($1, $2, $3, $4)")
        .bind(id)
        .bind(name)
        .bind(quantity_on_hand)
        .bind(status.as_str())
        .execute(pool)
        .await
        .context("insert_product failed")?;
    Ok(id)
}

pub async fn insert_order(pool: &PgPool, order: &Order, items: &[OrderItem]) -> Result<()> {
    let mut tx = pool.begin().await.context("insert_order begin failed")?;
    sqlx::query(
        r#"
        insert into orders (
          id, user_id, payment_reference, payment_status, fulfillment_status,
          total_minor, payment_method, paid_at_utc, customer_email, inventory_applied,
          refund_status, refund_ticket, created_at_utc, updated_at_utc
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(&order.payment_reference)
    .bind(order.payment_status.as_str())
    .bind(order.fulfillment_status.as_str())
    .bind(order.total)
    .bind(order.payment_method.as_deref())
    .bind(order.paid_at_utc)
    .bind(order.customer_email.as_deref())
    .bind(order.inventory_applied)
    .bind(order.refund_status.map(|s| s.as_str()))
    .bind(order.refund_ticket.as_deref())
    .bind(order.created_at_utc)
    .bind(order.updated_at_utc)
    .execute(&mut *tx)
    .await
    .context("insert_order failed")?;

    for item in items {
        sqlx::query(
            r#"
            insert into order_items (order_id, product_id, quantity, unit_price, applied_qty)
            values ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.applied_qty)
        .execute(&mut *tx)
        .await
        .context("insert_order item failed")?;
    }

    tx.commit().await.context("insert_order commit failed")?;
    Ok(())
}

/// Add a line to the user's cart, creating the cart on first use.
pub async fn add_cart_item(
    pool: &PgPool,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> Result<()> {
    let (cart_id,): (Uuid,) = sqlx::query_as::<_, (Uuid,)>(
        r#"
        insert into carts (id, user_id) values ($1, $2)
        on conflict (user_id) do update set user_id = excluded.user_id
        returning id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("add_cart_item cart upsert failed")?;

    sqlx::query(
        r#"
        insert into cart_items (cart_id, product_id, quantity) values ($1, $2, $3)
        on conflict (cart_id, product_id) do update set quantity = cart_items.quantity + excluded.quantity
        "#,
    )
    .bind(cart_id)
    .bind(product_id)
    .bind(quantity)
    .execute(pool)
    .await
    .context("add_cart_item failed")?;
    Ok(())
}

pub async fn cart_item_count(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from cart_items ci join carts c on c.id = ci.cart_id
        where c.user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("cart_item_count failed")?;
    Ok(n)
}

pub async fn product_quantity(pool: &PgPool, product_id: Uuid) -> Result<i32> {
    let (n,): (i32,) = sqlx::query_as::<_, (i32,)>(
        "select quantity_on_hand from products where id = $1",
    )
    .bind(product_id)
    .fetch_one(pool)
    .await
    .context("product_quantity failed")?;
    Ok(n)
}
