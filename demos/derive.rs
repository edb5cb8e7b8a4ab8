//! Example demonstrating the #[derive(Component)] macro
//!
//! Run with:
//!   cargo run --example derive --features derive

use component_container::{Component, Container, Descriptor};
use once_cell::sync::OnceCell;
use std::sync::Arc;

// Dependencies
#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct Cache {
    size: usize,
}

#[allow(dead_code)]
struct Logger {
    level: String,
}

// Component with injected dependencies
#[derive(Component)]
struct UserService {
    #[inject(required)]
    db: OnceCell<Arc<Database>>,
    #[inject(required)]
    cache: OnceCell<Arc<Cache>>,
    #[inject]
    logger: OnceCell<Arc<Logger>>,
    // Non-injected field uses Default
    request_count: u64,
}

impl UserService {
    fn describe(&self) -> String {
        let logger_status = if self.logger.get().is_some() {
            "with logging"
        } else {
            "without logging"
        };
        let url = self.db.get().map_or("<unwired>", |db| db.url.as_str());
        let size = self.cache.get().map_or(0, |cache| cache.size);
        format!(
            "UserService connected to {} with cache size {} ({}, requests: {})",
            url, size, logger_status, self.request_count
        )
    }
}

// Nested injection example
#[allow(dead_code)]
#[derive(Component)]
struct ApiController {
    #[inject(required)]
    user_service: OnceCell<Arc<UserService>>,
    #[inject(required)]
    db: OnceCell<Arc<Database>>,
}

fn main() {
    println!("=== Component Container Derive Macro Demo ===\n");

    let container = Container::new();
    container
        .register_instance(
            "database",
            Database {
                url: "postgres://localhost:5432/myapp".into(),
            },
        )
        .unwrap();
    container
        .register_instance("cache", Cache { size: 1024 })
        .unwrap();
    // Logger is NOT registered, so the optional field stays empty
    container
        .register_definition("users", Descriptor::new(UserService::component_type()))
        .unwrap();
    container
        .register_definition("api", Descriptor::new(ApiController::component_type()))
        .unwrap();

    println!("Resolving UserService from container...");
    let user_service = container
        .get_typed::<UserService>("users")
        .expect("Failed to create UserService");
    println!("  {}\n", user_service.describe());

    println!("Resolving ApiController (nested injection)...");
    let controller = container
        .get_typed::<ApiController>("api")
        .expect("Failed to create ApiController");
    let shared = controller
        .user_service
        .get()
        .is_some_and(|service| Arc::ptr_eq(service, &user_service));
    println!("  Controller shares the UserService instance: {shared}\n");

    println!("Registering Logger in a child container...");
    let child = container.scope();
    child
        .register_instance(
            "logger",
            Logger {
                level: "debug".into(),
            },
        )
        .unwrap();
    child
        .register_definition("users", Descriptor::new(UserService::component_type()))
        .unwrap();
    let with_logger = child.get_typed::<UserService>("users").unwrap();
    println!("  {}\n", with_logger.describe());

    println!("=== Demo Complete ===");
}
