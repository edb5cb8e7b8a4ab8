#![no_main]

//! Fuzz target for the definition and lookup API
//!
//! Registers components wired to each other through properties and
//! constructor arguments in arbitrary shapes, then looks them up. Lookups
//! may fail (cycles, missing names) but must never panic, and a shared
//! component must always resolve to the same instance.

use arbitrary::Arbitrary;
use component_container::{
    ArgSpec, ComponentType, Container, ContainerConfig, Descriptor, Instance, Param, TypeKey, Value,
    ValueSpec, ValueType, same_instance,
};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

const NAMES: [&str; 4] = ["a", "b", "c", "d"];

struct Node {
    next: OnceCell<Instance>,
}

fn node_type() -> Arc<ComponentType> {
    ComponentType::builder::<Node>()
        .constructor([], |_| Ok(Node { next: OnceCell::new() }))
        .constructor([Param::component::<Node>("next")], |args| {
            let next = OnceCell::new();
            if let Some(Value::Object(instance)) = args.first() {
                let _ = next.set(instance.clone());
            }
            Ok(Node { next })
        })
        .property("next", ValueType::component::<Node>(), |node: &Node, value| {
            if let Value::Object(instance) = value {
                let _ = node.next.set(instance);
            }
            Ok(())
        })
        .build()
}

fn name(index: u8) -> &'static str {
    NAMES[index as usize % NAMES.len()]
}

#[derive(Debug, Arbitrary)]
enum Wiring {
    None,
    Property(u8),
    Constructor(u8),
}

#[derive(Debug, Arbitrary)]
enum Op {
    Register {
        name: u8,
        prototype: bool,
        lazy: bool,
        wiring: Wiring,
    },
    Alias {
        name: u8,
        alias: u8,
    },
    Get(u8),
    GetByType,
    Preinstantiate,
    Shutdown,
}

#[derive(Debug, Arbitrary)]
struct Input {
    allow_circular_references: bool,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let container = Container::with_config(
        ContainerConfig::default().allow_circular_references(input.allow_circular_references),
    );
    let ty = node_type();
    let mut seen: HashMap<&'static str, Instance> = HashMap::new();

    for op in input.ops {
        match op {
            Op::Register {
                name: index,
                prototype,
                lazy,
                wiring,
            } => {
                let mut descriptor = Descriptor::new(Arc::clone(&ty));
                if prototype {
                    descriptor = descriptor.prototype();
                }
                if lazy {
                    descriptor = descriptor.lazy();
                }
                descriptor = match wiring {
                    Wiring::None => descriptor,
                    Wiring::Property(target) => descriptor.with_reference("next", name(target)),
                    Wiring::Constructor(target) => {
                        descriptor.with_arg(ArgSpec::new(ValueSpec::reference(name(target))))
                    }
                };
                // Replacing a definition also destroys its dependents
                if container.register_definition(name(index), descriptor).is_ok() {
                    seen.clear();
                }
            }
            Op::Alias { name: index, alias } => {
                let _ = container.register_alias(name(index), &format!("alias_{}", name(alias)));
            }
            Op::Get(index) => {
                let key = name(index);
                let Ok(instance) = container.get_instance(key) else {
                    continue;
                };
                assert!(instance.is::<Node>());
                if container.is_singleton(key).unwrap_or(false) {
                    if let Some(previous) = seen.get(key) {
                        assert!(same_instance(previous, &instance));
                    }
                    seen.insert(key, instance);
                }
            }
            Op::GetByType => {
                let _ = container.get_by_type(&TypeKey::of::<Node>());
            }
            Op::Preinstantiate => {
                let _ = container.preinstantiate_singletons();
            }
            Op::Shutdown => {
                container.shutdown();
                seen.clear();
            }
        }
    }
});
