//! Example demonstrating method interception
//!
//! Run with:
//!   cargo run --example interception

use component_container::{
    Advice, Advisor, AutoProxyCreator, ComponentType, Container, Descriptor, MethodSpec, Pointcut,
    ProxyFactory, Value, ValueType,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Accounts {
    balance: AtomicU64,
}

fn accounts_type() -> Arc<ComponentType> {
    ComponentType::builder::<Accounts>()
        .default_constructor()
        .method(
            MethodSpec::new("deposit")
                .param(ValueType::Int)
                .returns(ValueType::Int),
            |call| {
                let amount = call.args.int(0)?;
                let accounts = call.this::<Accounts>()?;
                let balance = accounts.balance.fetch_add(amount as u64, Ordering::SeqCst) + amount as u64;
                Ok(Value::Int(balance as i64))
            },
        )
        .method(MethodSpec::new("balance").returns(ValueType::Int), |call| {
            Ok(Value::Int(call.this::<Accounts>()?.balance.load(Ordering::SeqCst) as i64))
        })
        .build()
}

fn audit() -> Advisor {
    Advisor::with_pointcut(
        Pointcut::names(["deposit"]),
        Advice::before(|inv| {
            println!("  [audit] {}({:?})", inv.method().name(), inv.args());
            Ok(())
        }),
    )
}

fn main() {
    println!("=== Component Container Interception Demo ===\n");

    println!("1. Proxying an object by hand");
    let proxy = ProxyFactory::new()
        .target(Arc::new(Accounts::default()), accounts_type())
        .advisor(audit())
        .advice(Advice::around(|inv| {
            // Reject negative deposits before they reach the target
            if let Some(&Value::Int(amount)) = inv.args().first() {
                if amount < 0 {
                    println!("  [guard] clamping {amount} to 0");
                    inv.args_mut()[0] = Value::Int(0);
                }
            }
            inv.proceed()
        }))
        .build()
        .unwrap();

    println!("  balance = {:?}", proxy.invoke("deposit", vec![Value::Int(50)]).unwrap());
    println!("  balance = {:?}", proxy.invoke("deposit", vec![Value::Int(-10)]).unwrap());
    println!("  balance = {:?}\n", proxy.invoke("balance", vec![]).unwrap());

    println!("2. Proxying container components automatically");
    let container = Container::new();
    container.add_post_processor(Arc::new(AutoProxyCreator::new()));
    container.register_instance("audit", audit()).unwrap();
    container
        .register_definition("accounts", Descriptor::new(accounts_type()))
        .unwrap();

    container
        .invoke("accounts", "deposit", vec![Value::Int(25)])
        .unwrap();
    let balance = container.invoke("accounts", "balance", vec![]).unwrap();
    println!("  balance = {balance:?}");

    let instance = container.get_instance("accounts").unwrap();
    println!(
        "  'accounts' is a proxy: {}",
        instance.downcast_ref::<component_container::ForwardingProxy>().is_some()
    );

    println!("\n=== Demo Complete ===");
}
