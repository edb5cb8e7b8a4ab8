//! # Component Container - Managed Objects with Lifecycles and Interception
//!
//! A container that creates, wires, initializes, caches and disposes
//! named components from declarative descriptors, and can wrap them in
//! forwarding proxies that run advice around their method calls.
//!
//! ## Features
//!
//! - **Descriptors** - Scope, constructor arguments, property values,
//!   autowiring, init/destroy methods and parent inheritance per name
//! - **Shared and per-request scopes** - Plus pluggable custom scopes
//! - **Circular references** - Setter cycles between shared components
//!   resolve through early references; constructor cycles are reported
//!   with the full name chain
//! - **Post-processors** - Hooks around instantiation, property binding
//!   and initialization
//! - **Interception** - Advisors, match rules and forwarding proxies,
//!   applied by hand or automatically
//! - **Observable** - Optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use component_container::{ComponentType, Container, Descriptor, Param, ValueType};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct UserService {
//!     db: Arc<Database>,
//! }
//!
//! let container = Container::new();
//!
//! let database = ComponentType::builder::<Database>()
//!     .constructor([Param::new("url", ValueType::Str)], |args| {
//!         Ok(Database { url: args.str(0)?.to_string() })
//!     })
//!     .build();
//! let users = ComponentType::builder::<UserService>()
//!     .constructor([Param::component::<Database>("db")], |args| {
//!         Ok(UserService { db: args.object::<Database>(0)? })
//!     })
//!     .build();
//!
//! container
//!     .register_definition("database", Descriptor::new(database).with_arg("postgres://localhost"))
//!     .unwrap();
//! container
//!     .register_definition("users", Descriptor::new(users))
//!     .unwrap();
//!
//! let service = container.get_typed::<UserService>("users").unwrap();
//! assert_eq!(service.db.url, "postgres://localhost");
//!
//! // Shared components are created once
//! let db = container.get_typed::<Database>("database").unwrap();
//! assert!(Arc::ptr_eq(&db, &service.db));
//! ```
//!
//! ## Scopes
//!
//! ```rust
//! use component_container::{ComponentType, Container, Descriptor};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct RequestId;
//!
//! let container = Container::new();
//! let ty = ComponentType::builder::<RequestId>().default_constructor().build();
//! container
//!     .register_definition("request_id", Descriptor::new(ty).prototype())
//!     .unwrap();
//!
//! let a = container.get_typed::<RequestId>("request_id").unwrap();
//! let b = container.get_typed::<RequestId>("request_id").unwrap();
//! assert!(!Arc::ptr_eq(&a, &b));
//! ```
//!
//! ## Child Containers
//!
//! ```rust
//! use component_container::Container;
//!
//! struct AppConfig;
//! struct RequestContext;
//!
//! let root = Container::new();
//! root.register_instance("config", AppConfig).unwrap();
//!
//! let request = root.scope();
//! request.register_instance("context", RequestContext).unwrap();
//!
//! assert!(request.contains("config"));
//! assert!(request.contains("context"));
//! assert!(!root.contains("context"));
//! ```

extern crate self as component_container;

mod advice;
mod autoproxy;
mod component;
mod container;
mod descriptor;
mod error;
mod inject;
mod lifecycle;
#[cfg(feature = "logging")]
pub mod logging;
mod processor;
mod proxy;
mod registry;
mod resolver;
mod scope;
mod storage;
mod target;
mod value;

pub use advice::*;
pub use autoproxy::*;
pub use component::*;
pub use container::*;
pub use descriptor::*;
pub use error::*;
pub use inject::*;
pub use lifecycle::*;
pub use processor::*;
pub use proxy::*;
pub use registry::*;
pub use scope::*;
pub use storage::*;
pub use target::*;
pub use value::*;

#[cfg(feature = "derive")]
pub use component_container_derive::Component;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Advice, Advisor, Args, AutoProxyCreator, ComponentType, Container, ContainerConfig,
        Descriptor, DiError, Instance, MethodSpec, Param, Pointcut, PostProcessor, ProxyFactory,
        Result, Stages, TypeKey, Value, ValueSpec, ValueType,
    };
    pub use std::sync::Arc;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Database {
        url: String,
    }

    fn database_type() -> Arc<ComponentType> {
        ComponentType::builder::<Database>()
            .constructor([Param::new("url", ValueType::Str)], |args| {
                Ok(Database {
                    url: args.str(0)?.to_string(),
                })
            })
            .build()
    }

    #[test]
    fn test_shared_definition_resolves_same_instance() {
        let container = Container::new();
        container
            .register_definition("db", Descriptor::new(database_type()).with_arg("test"))
            .unwrap();

        let db1 = container.get_typed::<Database>("db").unwrap();
        let db2 = container.get_typed::<Database>("db").unwrap();

        assert_eq!(db1.url, "test");
        assert!(Arc::ptr_eq(&db1, &db2));
    }

    #[test]
    fn test_per_request_creates_new_instance() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        struct Counter(u32);

        let ty = ComponentType::builder::<Counter>()
            .constructor([], |_| Ok(Counter(COUNTER.fetch_add(1, Ordering::SeqCst))))
            .build();
        let container = Container::new();
        container
            .register_definition("counter", Descriptor::new(ty).prototype())
            .unwrap();

        let c1 = container.get_typed::<Counter>("counter").unwrap();
        let c2 = container.get_typed::<Counter>("counter").unwrap();

        assert_ne!(c1.0, c2.0);
    }

    #[test]
    fn test_lazy_definition_created_on_first_lookup() {
        static CREATED: AtomicU32 = AtomicU32::new(0);

        struct LazyService;

        let ty = ComponentType::builder::<LazyService>()
            .constructor([], |_| {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Ok(LazyService)
            })
            .build();
        let container = Container::new();
        container
            .register_definition("lazy", Descriptor::new(ty).lazy())
            .unwrap();
        container.preinstantiate_singletons().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 0);

        container.get_instance("lazy").unwrap();
        container.get_instance("lazy").unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_override_in_child_container() {
        let root = Container::new();
        root.register_definition("db", Descriptor::new(database_type()).with_arg("production"))
            .unwrap();

        let child = root.scope();
        child
            .register_definition("db", Descriptor::new(database_type()).with_arg("test"))
            .unwrap();

        assert_eq!(root.get_typed::<Database>("db").unwrap().url, "production");
        assert_eq!(child.get_typed::<Database>("db").unwrap().url, "test");
    }

    #[test]
    fn test_not_found_error() {
        let container = Container::new();
        assert!(matches!(
            container.get_instance("missing"),
            Err(DiError::DefinitionNotFound { .. })
        ));
    }
}
