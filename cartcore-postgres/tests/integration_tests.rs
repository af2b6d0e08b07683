//! Integration tests for the Postgres cart store.
//!
//! Each test starts its own container; Docker must be available.

mod common;

use std::sync::Arc;

use cartcore::testing::fixtures::{knife, quantity, shopper};
use cartcore::{
    CartError, CartKey, CartStore, Entity, OrderConsistencyManager, OrderId, OrderRepository,
    OrderWrite, PaidOrderPolicy, ProductRepository, StoreError, UserId, UserRepository,
};
use common::PostgresTestFixture;
use futures::future::join_all;

#[tokio::test]
async fn additions_accumulate_in_a_single_cart() {
    let fixture = PostgresTestFixture::new().await;
    let service = fixture.service();
    let user = service.register_user(shopper("ana")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    let petty = service.create_product(knife("Petty")).await.expect("product");

    service.add_to_cart(user.id, gyuto.id, 2).await.expect("add");
    service.add_to_cart(user.id, petty.id, 1).await.expect("add");
    let cart = service.add_to_cart(user.id, gyuto.id, 3).await.expect("add");

    assert_eq!(cart.items.quantity_of(gyuto.id), Some(quantity(5)));
    assert_eq!(cart.items.quantity_of(petty.id), Some(quantity(1)));
    assert_eq!(service.all_orders().await.expect("orders").len(), 1);
    assert_eq!(
        fixture.raw_items(cart.id.into_inner()).await,
        format!("{}:5#,#{}:1", gyuto.id, petty.id)
    );
}

#[tokio::test]
async fn product_removal_cascades_in_one_transaction() {
    let fixture = PostgresTestFixture::new().await;
    let service = fixture.service();
    let ana = service.register_user(shopper("ana")).await.expect("user");
    let ben = service.register_user(shopper("ben")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    let petty = service.create_product(knife("Petty")).await.expect("product");

    service.add_to_cart(ana.id, gyuto.id, 2).await.expect("add");
    service.add_to_cart(ben.id, gyuto.id, 1).await.expect("add");
    service.add_to_cart(ben.id, petty.id, 4).await.expect("add");

    service.delete_product(gyuto.id).await.expect("delete");

    assert!(service.cart(ana.id).await.expect("lookup").is_none());
    let ben_cart = service.cart(ben.id).await.expect("lookup").expect("cart");
    assert!(!ben_cart.items.contains(gyuto.id));
    assert_eq!(ben_cart.items.quantity_of(petty.id), Some(quantity(4)));
    assert!(!fixture.store.exists(gyuto.id).await.expect("exists"));
}

#[tokio::test]
async fn reference_scan_ignores_id_suffixes() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let user = store.insert_user(shopper("ana")).await.expect("user");
    let mut products = Vec::new();
    for index in 0..12 {
        let product = store
            .insert_product(knife(&format!("Knife {index}")))
            .await
            .expect("product");
        products.push(product.id);
    }
    // Product 12 must not match a scan for product 2.
    let blob = format!("{}:1", products[11]);
    fixture.insert_raw_order(user.id.into_inner(), false, &blob).await;

    let referencing = store.find_all_referencing(products[1]).await.expect("scan");
    assert!(referencing.is_empty());
    let referencing = store.find_all_referencing(products[11]).await.expect("scan");
    assert_eq!(referencing.len(), 1);
}

#[tokio::test]
async fn stale_plan_is_rejected_without_writing() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let ana = store.insert_user(shopper("ana")).await.expect("user");
    let ben = store.insert_user(shopper("ben")).await.expect("user");
    let gyuto = store.insert_product(knife("Gyuto")).await.expect("product");
    let items = cartcore::merge::add_to_cart(None, gyuto.id, 1).expect("valid");

    store
        .save_order(OrderWrite::Create {
            user_id: ana.id,
            items: items.clone(),
        })
        .await
        .expect("cart");
    let scanned = store.find_all_referencing(gyuto.id).await.expect("scan");
    let removal = OrderConsistencyManager::default().plan_removal(gyuto.id, scanned);

    // A new cart appears after the scan.
    store
        .save_order(OrderWrite::Create {
            user_id: ben.id,
            items,
        })
        .await
        .expect("cart");

    assert_eq!(
        store.commit_product_removal(&removal).await,
        Err(StoreError::StaleCascade {
            product_id: gyuto.id
        })
    );
    assert!(store.exists(gyuto.id).await.expect("exists"));
    assert_eq!(store.list_orders().await.expect("orders").len(), 2);
}

#[tokio::test]
async fn preserve_policy_keeps_paid_orders() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let user = store.insert_user(shopper("ana")).await.expect("user");
    let gyuto = store.insert_product(knife("Gyuto")).await.expect("product");
    let blob = format!("{}:2", gyuto.id);
    let paid = fixture.insert_raw_order(user.id.into_inner(), true, &blob).await;

    let scanned = store.find_all_referencing(gyuto.id).await.expect("scan");
    let removal = OrderConsistencyManager::new(PaidOrderPolicy::Preserve).plan_removal(gyuto.id, scanned);
    store.commit_product_removal(&removal).await.expect("commit");

    assert_eq!(fixture.raw_items(paid).await, blob);
}

#[tokio::test]
async fn second_cart_for_a_user_violates_the_unique_index() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let user = store.insert_user(shopper("ana")).await.expect("user");
    let gyuto = store.insert_product(knife("Gyuto")).await.expect("product");
    let items = cartcore::merge::add_to_cart(None, gyuto.id, 1).expect("valid");

    store
        .save_order(OrderWrite::Create {
            user_id: user.id,
            items: items.clone(),
        })
        .await
        .expect("first cart");
    let second = store
        .save_order(OrderWrite::Create {
            user_id: user.id,
            items,
        })
        .await;

    assert!(matches!(second, Err(StoreError::UniqueViolation(_))));
}

#[tokio::test]
async fn stale_versions_and_paid_orders_are_rejected() {
    let fixture = PostgresTestFixture::new().await;
    let service = fixture.service();
    let store = &fixture.store;
    let user = service.register_user(shopper("ana")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    let first = service.add_to_cart(user.id, gyuto.id, 1).await.expect("add");
    let second = service.add_to_cart(user.id, gyuto.id, 1).await.expect("add");

    let stale = store
        .save_order(OrderWrite::UpdateItems {
            id: first.id,
            expected_version: first.version,
            items: first.items.clone(),
        })
        .await;
    assert_eq!(stale, Err(StoreError::VersionConflict { order_id: first.id }));

    let paid = service.pay(user.id).await.expect("pay");
    let frozen = store
        .save_order(OrderWrite::UpdateItems {
            id: paid.id,
            expected_version: paid.version,
            items: second.items,
        })
        .await;
    assert_eq!(frozen, Err(StoreError::OrderFrozen { order_id: paid.id }));

    let history = store
        .find_all_by_user(CartKey {
            user_id: user.id,
            paid: true,
        })
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].paid_at.is_some());
}

#[tokio::test]
async fn stale_delete_leaves_the_newer_cart_in_place() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let user = store.insert_user(shopper("ana")).await.expect("user");
    let gyuto = store.insert_product(knife("Gyuto")).await.expect("product");
    let petty = store.insert_product(knife("Petty")).await.expect("product");
    let items = cartcore::merge::add_to_cart(None, gyuto.id, 1).expect("valid");
    let read = store
        .save_order(OrderWrite::Create {
            user_id: user.id,
            items: items.clone(),
        })
        .await
        .expect("cart");
    let grown = cartcore::merge::add_to_cart(Some(&items), petty.id, 4).expect("valid");
    let current = store
        .save_order(OrderWrite::UpdateItems {
            id: read.id,
            expected_version: read.version,
            items: grown,
        })
        .await
        .expect("concurrent addition");

    assert_eq!(
        store.delete_order(read.id, read.version).await,
        Err(StoreError::VersionConflict { order_id: read.id })
    );
    assert_eq!(
        fixture.raw_items(read.id.into_inner()).await,
        format!("{}:1#,#{}:4", gyuto.id, petty.id)
    );

    store
        .delete_order(current.id, current.version)
        .await
        .expect("current version deletes");
    assert_eq!(
        store.delete_order(current.id, current.version).await,
        Err(StoreError::NotFound(Entity::Order(current.id)))
    );
}

#[tokio::test]
async fn catalog_and_profile_updates_are_persisted() {
    let fixture = PostgresTestFixture::new().await;
    let service = fixture.service();
    let user = service.register_user(shopper("ana")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    service.set_stock(gyuto.id, 3).await.expect("stock");

    let details = knife("Gyuto 270").details;
    let updated = service
        .update_product(gyuto.id, details.clone())
        .await
        .expect("update");
    let avatar = service
        .set_avatar(user.id, "avatars/ana.png")
        .await
        .expect("avatar");

    assert_eq!(updated.details, details);
    assert_eq!(updated.stock.into_inner(), 3);
    assert_eq!(avatar.avatar, "avatars/ana.png");
    assert_eq!(
        fixture.store.find_user(user.id).await.expect("lookup"),
        Some(avatar)
    );
}

#[tokio::test]
async fn order_details_skip_items_of_deleted_products() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let service = fixture.service();
    let user = service.register_user(shopper("ana")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    let blob = format!("{}:2#,#{}:1", gyuto.id, gyuto.id.into_inner() + 100);
    let order_id = fixture.insert_raw_order(user.id.into_inner(), true, &blob).await;

    let details = service
        .order_details(OrderId::try_new(order_id).expect("valid id"))
        .await
        .expect("details");

    assert_eq!(details.owner.username.as_ref(), "ana");
    assert_eq!(details.lines.len(), 1);
    assert_eq!(details.lines[0].product.id, gyuto.id);
    assert_eq!(store.list_orders().await.expect("orders").len(), 1);
}

#[tokio::test]
async fn corrupt_rows_surface_as_malformed_items() {
    let fixture = PostgresTestFixture::new().await;
    let service = fixture.service();
    let user = service.register_user(shopper("ana")).await.expect("user");
    let gyuto = service.create_product(knife("Gyuto")).await.expect("product");
    let blob = format!("{}:2#,#oops", gyuto.id);
    let order_id = fixture.insert_raw_order(user.id.into_inner(), false, &blob).await;

    let result = service.add_to_cart(user.id, gyuto.id, 1).await;

    assert!(matches!(
        result,
        Err(CartError::MalformedItem { order_id: corrupt, .. })
            if corrupt == OrderId::try_new(order_id).expect("valid id")
    ));
    assert_eq!(fixture.raw_items(order_id).await, blob);
}

#[tokio::test]
async fn missing_records_are_reported() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    let ghost = UserId::try_new(404).expect("valid id");
    let user = store.insert_user(shopper("ana")).await.expect("user");
    let gyuto = store.insert_product(knife("Gyuto")).await.expect("product");
    let items = cartcore::merge::add_to_cart(None, gyuto.id, 1).expect("valid");

    assert_eq!(
        store
            .save_order(OrderWrite::Create {
                user_id: ghost,
                items: items.clone()
            })
            .await,
        Err(StoreError::NotFound(Entity::User(ghost)))
    );

    let missing = cartcore::ProductId::try_new(gyuto.id.into_inner() + 1).expect("valid id");
    let dangling = cartcore::merge::add_to_cart(Some(&items), missing, 1).expect("valid");
    assert_eq!(
        store
            .save_order(OrderWrite::Create {
                user_id: user.id,
                items: dangling
            })
            .await,
        Err(StoreError::NotFound(Entity::Product(missing)))
    );
    assert!(matches!(
        store.insert_user(shopper("ana")).await,
        Err(StoreError::UniqueViolation(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removal_racing_additions_leaves_no_dangling_reference() {
    let fixture = PostgresTestFixture::new().await;
    let service = Arc::new(fixture.service());
    let doomed = service.create_product(knife("Doomed")).await.expect("product");
    let mut users = Vec::new();
    for index in 0..6 {
        let user = service
            .register_user(shopper(&format!("user-{index}")))
            .await
            .expect("user");
        users.push(user.id);
    }

    let adders: Vec<_> = users
        .iter()
        .map(|&user| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.add_to_cart(user, doomed.id, 1).await })
        })
        .collect();
    let deleter = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.delete_product(doomed.id).await })
    };

    let additions = join_all(adders).await;
    deleter.await.expect("task completes").expect("deletion succeeds");

    for addition in additions {
        match addition.expect("task completes") {
            Ok(_) | Err(CartError::NotFound(Entity::Product(_))) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    for order in service.all_orders().await.expect("orders") {
        assert!(!order.items.contains(doomed.id));
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn rejected_writes_are_logged_inside_their_span() {
    let fixture = PostgresTestFixture::new().await;
    let store = &fixture.store;
    store.insert_user(shopper("ana")).await.expect("user");

    let duplicate = store.insert_user(shopper("ana")).await;

    assert!(matches!(duplicate, Err(StoreError::UniqueViolation(_))));
    assert!(
        logs_contain("postgres.insert_user") && logs_contain("postgres.unique_violation"),
        "unique violations should be logged inside the insert span",
    );
}
