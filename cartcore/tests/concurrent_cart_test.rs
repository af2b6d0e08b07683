//! Concurrent cart scenarios.
//!
//! These tests run on the multi-threaded runtime so that racing tasks really
//! interleave.

use std::sync::Arc;

use cartcore::config::{CartServiceConfig, RetrySettings};
use cartcore::testing::fixtures::{knife, quantity, shopper};
use cartcore::{CartError, CartService, Entity, InMemoryCartStore, ProductId, UserId};
use futures::future::join_all;
use tokio::sync::Barrier;

async fn service_with_users(count: usize) -> (Arc<CartService<InMemoryCartStore>>, Vec<UserId>) {
    // Each racing addition can invalidate at most one cascade attempt.
    let retry = RetrySettings::aggressive().expect("valid preset");
    let config = CartServiceConfig::default().with_retry(retry);
    let service = CartService::with_config(InMemoryCartStore::new(), &config);
    let mut users = Vec::with_capacity(count);
    for index in 0..count {
        let user = service
            .register_user(shopper(&format!("user-{index}")))
            .await
            .expect("user");
        users.push(user.id);
    }
    (Arc::new(service), users)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_additions_for_one_user_are_never_lost() {
    let (service, users) = service_with_users(1).await;
    let user = users[0];
    let product = service.create_product(knife("Gyuto")).await.expect("product");
    let barrier = Arc::new(Barrier::new(32));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.add_to_cart(user, product.id, 1).await
            })
        })
        .collect();

    for result in join_all(tasks).await {
        result.expect("task completes").expect("addition succeeds");
    }

    let cart = service.cart(user).await.expect("lookup").expect("cart");
    assert_eq!(cart.items.quantity_of(product.id), Some(quantity(32)));
    assert_eq!(service.all_orders().await.expect("orders").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_users_proceed_independently() {
    let (service, users) = service_with_users(8).await;
    let product = service.create_product(knife("Petty")).await.expect("product");

    let mut tasks = Vec::new();
    for &user in &users {
        for _ in 0..4 {
            let service = Arc::clone(&service);
            tasks.push(tokio::spawn(async move {
                service.add_to_cart(user, product.id, 2).await
            }));
        }
    }

    for result in join_all(tasks).await {
        result.expect("task completes").expect("addition succeeds");
    }

    for user in users {
        let cart = service.cart(user).await.expect("lookup").expect("cart");
        assert_eq!(cart.items.quantity_of(product.id), Some(quantity(8)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn product_deletion_racing_additions_leaves_no_dangling_reference() {
    for _ in 0..20 {
        let (service, users) = service_with_users(6).await;
        let doomed = service.create_product(knife("Doomed")).await.expect("product");
        let kept = service.create_product(knife("Kept")).await.expect("product");
        for &user in &users[..3] {
            service.add_to_cart(user, kept.id, 1).await.expect("seed cart");
        }
        let barrier = Arc::new(Barrier::new(users.len() + 1));

        let adders: Vec<_> = users
            .iter()
            .map(|&user| {
                let service = Arc::clone(&service);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    service.add_to_cart(user, doomed.id, 1).await
                })
            })
            .collect();
        let deleter = {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.delete_product(doomed.id).await
            })
        };

        let additions = join_all(adders).await;
        deleter.await.expect("task completes").expect("deletion succeeds");

        for addition in additions {
            match addition.expect("task completes") {
                Ok(_) | Err(CartError::NotFound(Entity::Product(_))) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_no_reference(&service, doomed.id).await;
    }
}

async fn assert_no_reference(service: &CartService<InMemoryCartStore>, product: ProductId) {
    let orders = service.all_orders().await.expect("orders");
    for order in orders {
        assert!(
            !order.items.contains(product),
            "order {} still references deleted product {product}",
            order.id
        );
        assert!(!order.items.is_empty(), "order {} has no items", order.id);
    }
}
