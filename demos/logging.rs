//! Example demonstrating logging capabilities
//!
//! Run with JSON logging (production):
//! ```bash
//! cargo run --example logging --features logging-json
//! ```
//!
//! Run with pretty logging (development):
//! ```bash
//! cargo run --example logging --features logging-pretty
//! ```

use component_container::{ComponentType, ContextScope, Container, Descriptor, Param, ScopeKind};
use std::sync::Arc;

// Example components
#[allow(dead_code)]
struct Database {
    url: String,
}

#[allow(dead_code)]
struct UserService {
    db: Arc<Database>,
}

#[allow(dead_code)]
struct RequestContext {
    request_id: String,
}

fn main() {
    // Uses JSON if logging-json is enabled, pretty if logging-pretty is enabled
    #[cfg(feature = "logging")]
    {
        component_container::logging::init();
    }

    println!("=== Component Container Logging Demo ===\n");

    // Logs: "Creating root container"
    let container = Container::new();

    // Logs: "Registering shared instance", "Registered component definition"
    container
        .register_instance(
            "database",
            Database {
                url: "postgres://localhost/mydb".into(),
            },
        )
        .unwrap();

    let users = ComponentType::builder::<UserService>()
        .constructor([Param::component::<Database>("db")], |args| {
            Ok(UserService { db: args.object(0)? })
        })
        .build();
    container
        .register_definition("users", Descriptor::new(users))
        .unwrap();

    let requests = ComponentType::builder::<RequestContext>()
        .constructor([], |_| {
            println!("  [App] Request context being created...");
            Ok(RequestContext {
                request_id: "req-12345".into(),
            })
        })
        .build();
    container
        .register_definition(
            "request_context",
            Descriptor::new(requests).with_scope(ScopeKind::parse("request")),
        )
        .unwrap();

    let request_scope = Arc::new(ContextScope::new("request"));
    container
        .register_scope("request", request_scope.clone())
        .unwrap();

    // Logs: "Pre-instantiating shared components", "Creating component"
    container.preinstantiate_singletons().unwrap();
    let _users = container.get_typed::<UserService>("users").unwrap();

    // Fails with DefinitionNotFound
    assert!(container.get_instance("missing").is_err());

    // Logs: "Starting scope context", "Ending scope context"
    let id = request_scope.begin();
    {
        let _entered = request_scope.enter(id);
        let _ctx = container
            .get_typed::<RequestContext>("request_context")
            .unwrap();
    }
    request_scope.end(id);

    // Logs: "Creating child container"
    let child = container.scope();
    let _db_from_child = child.get_typed::<Database>("database").unwrap();

    // Logs: "Container locked - no further registrations allowed"
    container.lock();

    // Logs: "Shutting down container", "Destroying shared instances"
    container.shutdown();

    println!("\n=== Demo Complete ===");
    println!("Check the log output above to see structured logging in action!");
    println!("\nTip: Use --features logging-json for production (JSON output)");
    println!("     Use --features logging-pretty for development (colorful output)");
}
