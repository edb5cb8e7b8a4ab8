//! Benchmarks for the component container

use component_container::{
    Advice, Advisor, ComponentType, Container, Descriptor, MethodSpec, Param, Pointcut, ProxyFactory,
    Value, ValueType,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

#[allow(dead_code)]
struct SmallService {
    value: i64,
}

#[allow(dead_code)]
struct Repository {
    small: Arc<SmallService>,
}

#[allow(dead_code)]
struct Controller {
    repository: Arc<Repository>,
    small: Arc<SmallService>,
}

fn small_type() -> Arc<ComponentType> {
    ComponentType::builder::<SmallService>()
        .constructor([], |_| Ok(SmallService { value: 42 }))
        .method(MethodSpec::new("value").returns(ValueType::Int), |call| {
            Ok(Value::Int(call.this::<SmallService>()?.value))
        })
        .build()
}

fn repository_type() -> Arc<ComponentType> {
    ComponentType::builder::<Repository>()
        .constructor([Param::component::<SmallService>("small")], |args| {
            Ok(Repository {
                small: args.object(0)?,
            })
        })
        .build()
}

fn controller_type() -> Arc<ComponentType> {
    ComponentType::builder::<Controller>()
        .constructor(
            [
                Param::component::<Repository>("repository"),
                Param::component::<SmallService>("small"),
            ],
            |args| {
                Ok(Controller {
                    repository: args.object(0)?,
                    small: args.object(1)?,
                })
            },
        )
        .build()
}

fn wired_container(prototype: bool) -> Container {
    let container = Container::new();
    let scoped = |descriptor: Descriptor| if prototype { descriptor.prototype() } else { descriptor };
    container
        .register_definition("small", Descriptor::new(small_type()))
        .unwrap();
    container
        .register_definition("repository", scoped(Descriptor::new(repository_type())))
        .unwrap();
    container
        .register_definition("controller", scoped(Descriptor::new(controller_type())))
        .unwrap();
    container
}

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    let ty = small_type();

    group.bench_function("definition", |b| {
        b.iter(|| {
            let container = Container::new();
            container
                .register_definition("small", Descriptor::new(Arc::clone(&ty)))
                .unwrap();
            black_box(container)
        })
    });

    group.bench_function("instance", |b| {
        b.iter(|| {
            let container = Container::new();
            container
                .register_instance("small", SmallService { value: 42 })
                .unwrap();
            black_box(container)
        })
    });

    group.bench_function("wired_3_definitions", |b| b.iter(|| black_box(wired_container(false))));

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    group.throughput(Throughput::Elements(1));

    let container = wired_container(false);
    container.preinstantiate_singletons().unwrap();
    container.register_alias("small", "tiny").unwrap();

    group.bench_function("get_shared", |b| {
        b.iter(|| black_box(container.get_instance("small").unwrap()))
    });

    group.bench_function("get_shared_via_alias", |b| {
        b.iter(|| black_box(container.get_instance("tiny").unwrap()))
    });

    group.bench_function("get_typed", |b| {
        b.iter(|| black_box(container.get_typed::<SmallService>("small").unwrap()))
    });

    group.bench_function("contains_check", |b| b.iter(|| black_box(container.contains("small"))));

    group.bench_function("get_not_found", |b| {
        b.iter(|| black_box(container.get_instance("missing").is_err()))
    });

    group.finish();
}

fn bench_per_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("per_request");
    group.throughput(Throughput::Elements(1));

    let container = wired_container(true);

    group.bench_function("create_wired_controller", |b| {
        b.iter(|| black_box(container.get_instance("controller").unwrap()))
    });

    group.bench_function("create_with_args", |b| {
        let small = container.get_instance("small").unwrap();
        b.iter(|| {
            black_box(
                container
                    .get_instance_with_args("repository", vec![Value::Object(small.clone())])
                    .unwrap(),
            )
        })
    });

    group.finish();
}

fn bench_child_containers(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_containers");

    group.bench_function("create_child", |b| {
        let root = wired_container(false);
        b.iter(|| black_box(root.scope()))
    });

    group.bench_function("resolve_from_parent", |b| {
        let root = wired_container(false);
        let child = root.scope();
        b.iter(|| black_box(child.get_instance("small").unwrap()))
    });

    group.finish();
}

fn bench_interception(c: &mut Criterion) {
    let mut group = c.benchmark_group("interception");
    group.throughput(Throughput::Elements(1));

    let target = Arc::new(SmallService { value: 42 });
    let plain = ProxyFactory::new()
        .target(target.clone(), small_type())
        .build()
        .unwrap();
    let advised = ProxyFactory::new()
        .target(target, small_type())
        .advisor(Advisor::with_pointcut(
            Pointcut::names(["value"]),
            Advice::around(|inv| inv.proceed()),
        ))
        .advisor(Advisor::new(Advice::before(|_| Ok(()))))
        .build()
        .unwrap();

    group.bench_function("empty_chain", |b| {
        b.iter(|| black_box(plain.invoke("value", vec![]).unwrap()))
    });

    group.bench_function("two_interceptors", |b| {
        b.iter(|| black_box(advised.invoke("value", vec![]).unwrap()))
    });

    group.finish();
}

fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");

    group.bench_function("concurrent_reads_4", |b| {
        let container = wired_container(false);
        container.preinstantiate_singletons().unwrap();

        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let c = container.clone();
                    thread::spawn(move || {
                        for _ in 0..100 {
                            let _ = c.get_instance("controller").unwrap();
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_registration,
    bench_resolution,
    bench_per_request,
    bench_child_containers,
    bench_interception,
    bench_concurrent,
);

criterion_main!(benches);
