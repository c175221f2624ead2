use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cacheweave::config::WeaveConfig;
use cacheweave::module::ModuleDef;
use cacheweave::parser::parse_module;
use cacheweave::runtime::{Interpreter, RuntimeError, Value};
use cacheweave::weaver::{MemberOutcome, Weaver};
use weave_cache::{
    CacheProvider, Clock, DistributedMemoryCache, LocalBus, ManualClock, MemoryCache,
    ProviderRegistry, RuntimeCache,
};

const CALCULATOR: &str = r#"module Sample
assembly Sample
reference Cache

type Sample.Calculator:
    field hits: i32 static
    method Calc(a: i32, b: i32) -> i32 static @Cache:
        ldsfld Sample.Calculator::hits
        ldc.i4 1
        add
        stsfld Sample.Calculator::hits
        ldarg a
        ldarg b
        add
        ret
    method Timed(n: i32) -> i32 static @Cache(duration: 30):
        ldsfld Sample.Calculator::hits
        ldc.i4 1
        add
        stsfld Sample.Calculator::hits
        ldarg n
        ldc.i4 2
        mul
        ret

type Sample.Plain:
    field hits: i32 static
    method init() -> void ctor:
        ret
    method Twice(n: i32) -> i32 @Cache:
        ldsfld Sample.Plain::hits
        ldc.i4 1
        add
        stsfld Sample.Plain::hits
        ldarg n
        ldc.i4 2
        mul
        ret
"#;

const ACCOUNT: &str = r#"module Sample
assembly Sample
reference Cache

type Sample.Account @Cache:
    field name: string
    method init() -> void ctor:
        ret
    property Cache: Cache.ICacheProvider get get_Cache
    method get_Cache() -> Cache.ICacheProvider getter:
        call Cache.CacheProvider::get_Provider
        ret
    property Name: string get get_Name set set_Name
    method get_Name() -> string getter:
        ldarg 0
        ldfld Sample.Account::name
        ret
    method set_Name(value: string) -> void setter:
        ldarg 0
        ldarg value
        stfld Sample.Account::name
        ret
"#;

fn woven(source: &str, config: WeaveConfig) -> ModuleDef {
    let mut module = parse_module(source).expect("fixture parses");
    Weaver::new(config).run(&mut module).expect("weaving succeeds");
    module
}

fn interpreter(module: &ModuleDef, provider: Arc<dyn CacheProvider>) -> Interpreter {
    Interpreter::new(module, ProviderRegistry::with_provider(provider))
}

fn hits(interpreter: &Interpreter, owner: &str) -> Value {
    interpreter.static_field(owner, "hits").expect("hits field exists")
}

fn calc(interpreter: &Interpreter, a: i32, b: i32) -> Value {
    interpreter
        .invoke("Sample.Calculator", "Calc", None, vec![Value::I32(a), Value::I32(b)])
        .expect("Calc runs")
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn repeated_calls_are_served_from_the_cache() {
    let module = woven(CALCULATOR, WeaveConfig::default());
    let cache = Arc::new(RuntimeCache::new());
    let vm = interpreter(&module, cache.clone());

    assert_eq!(calc(&vm, 1, 2), Value::I32(3));
    assert_eq!(calc(&vm, 1, 2), Value::I32(3));
    assert_eq!(hits(&vm, "Sample.Calculator"), Value::I32(1));
    assert!(cache.contains("Sample.Calculator.Calc_1_2"));

    assert_eq!(calc(&vm, 2, 2), Value::I32(4));
    assert_eq!(hits(&vm, "Sample.Calculator"), Value::I32(2));
    assert!(cache.contains("Sample.Calculator.Calc_2_2"));
}

#[test]
fn skipped_members_keep_their_original_behaviour() {
    let mut module = parse_module(CALCULATOR).unwrap();
    let report = Weaver::new(WeaveConfig::default()).run(&mut module).unwrap();
    assert!(matches!(
        report.outcome("Sample.Plain::Twice"),
        Some(MemberOutcome::Skipped { .. })
    ));

    let vm = interpreter(&module, Arc::new(RuntimeCache::new()));
    let plain = vm.instantiate("Sample.Plain").unwrap();
    for _ in 0..2 {
        let result = vm
            .invoke("Sample.Plain", "Twice", Some(plain.clone()), vec![Value::I32(4)])
            .unwrap();
        assert_eq!(result, Value::I32(8));
    }
    assert_eq!(hits(&vm, "Sample.Plain"), Value::I32(2));
}

#[test]
fn property_setter_invalidates_the_cached_getter() {
    let module = woven(ACCOUNT, WeaveConfig::default());
    let cache = Arc::new(RuntimeCache::new());
    let vm = interpreter(&module, cache.clone());
    let account = vm.instantiate("Sample.Account").unwrap();

    let set = |name: &str| {
        vm.invoke("Sample.Account", "set_Name", Some(account.clone()), vec![Value::string(name)])
            .unwrap();
    };
    let get = || {
        vm.invoke("Sample.Account", "get_Name", Some(account.clone()), Vec::new())
            .unwrap()
    };

    set("ada");
    assert_eq!(get(), Value::string("ada"));
    assert!(cache.contains("Sample.Account.Name"));

    set("grace");
    assert!(!cache.contains("Sample.Account.Name"));
    assert_eq!(get(), Value::string("grace"));
}

#[test]
fn duration_option_expires_entries() {
    let module = woven(CALCULATOR, WeaveConfig::default());
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(MemoryCache::with_clock(clock.clone() as Arc<dyn Clock>));
    let vm = interpreter(&module, cache.clone());

    // Binds the synthesized accessor for the whole type.
    calc(&vm, 0, 0);
    let timed = |n: i32| {
        vm.invoke("Sample.Calculator", "Timed", None, vec![Value::I32(n)])
            .unwrap()
    };

    assert_eq!(timed(5), Value::I32(10));
    assert_eq!(timed(5), Value::I32(10));
    assert_eq!(hits(&vm, "Sample.Calculator"), Value::I32(2));

    clock.advance(Duration::from_secs(29));
    timed(5);
    assert_eq!(hits(&vm, "Sample.Calculator"), Value::I32(2));

    clock.advance(Duration::from_secs(2));
    assert_eq!(timed(5), Value::I32(10));
    assert_eq!(hits(&vm, "Sample.Calculator"), Value::I32(3));
}

#[test]
fn missing_provider_fails_at_runtime() {
    let module = woven(CALCULATOR, WeaveConfig::default());
    let vm = Interpreter::new(&module, ProviderRegistry::new());
    let error = vm
        .invoke("Sample.Calculator", "Calc", None, vec![Value::I32(1), Value::I32(2)])
        .unwrap_err();
    assert!(matches!(error, RuntimeError::NoProviderConfigured));
}

#[test]
fn key_tracing_reports_each_cache_step() {
    let config = WeaveConfig {
        trace_keys: true,
        ..WeaveConfig::default()
    };
    let module = woven(CALCULATOR, config);
    let vm = interpreter(&module, Arc::new(RuntimeCache::new()));

    calc(&vm, 1, 2);
    calc(&vm, 1, 2);
    assert_eq!(
        vm.trace_log(),
        [
            "cache key created: Sample.Calculator.Calc_1_2",
            "storing to cache",
            "cache key created: Sample.Calculator.Calc_1_2",
            "loading from cache",
        ]
    );
}

#[test]
fn concurrent_callers_see_consistent_results() {
    let module = woven(CALCULATOR, WeaveConfig::default());
    let vm = Arc::new(interpreter(&module, Arc::new(RuntimeCache::new())));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let vm = Arc::clone(&vm);
            thread::spawn(move || {
                (0..50)
                    .map(|round| {
                        let a = (worker + round) % 3;
                        (a, calc(&vm, a, 10))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for (a, result) in handle.join().expect("worker finished") {
            assert_eq!(result, Value::I32(a + 10));
        }
    }
}

#[test]
fn distributed_nodes_share_stores_and_invalidations() {
    let bus = LocalBus::new();
    let node_a = Arc::new(DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap());
    let node_b = Arc::new(DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap());

    let calculator = woven(CALCULATOR, WeaveConfig::default());
    let calc_a = interpreter(&calculator, node_a.clone());
    let calc_b = interpreter(&calculator, node_b.clone());

    assert_eq!(calc(&calc_a, 2, 3), Value::I32(5));
    assert!(wait_until(|| node_b.contains("Sample.Calculator.Calc_2_3")));
    assert_eq!(calc(&calc_b, 2, 3), Value::I32(5));
    assert_eq!(hits(&calc_b, "Sample.Calculator"), Value::I32(0));

    let account = woven(ACCOUNT, WeaveConfig::default());
    let vm_a = interpreter(&account, node_a.clone());
    let holder = vm_a.instantiate("Sample.Account").unwrap();
    vm_a.invoke("Sample.Account", "set_Name", Some(holder.clone()), vec![Value::string("ada")])
        .unwrap();
    let name = vm_a
        .invoke("Sample.Account", "get_Name", Some(holder.clone()), Vec::new())
        .unwrap();
    assert_eq!(name, Value::string("ada"));
    assert!(wait_until(|| node_b.contains("Sample.Account.Name")));

    vm_a.invoke("Sample.Account", "set_Name", Some(holder), vec![Value::string("x")])
        .unwrap();
    assert!(wait_until(|| !node_b.contains("Sample.Account.Name")));

    node_a.shutdown();
    node_b.shutdown();
}

#[test]
fn null_results_stay_on_the_storing_node() {
    let bus = LocalBus::new();
    let node_a = Arc::new(DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap());
    let node_b = Arc::new(DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap());

    let account = woven(ACCOUNT, WeaveConfig::default());
    let vm_a = interpreter(&account, node_a.clone());
    let fresh = vm_a.instantiate("Sample.Account").unwrap();
    let name = vm_a
        .invoke("Sample.Account", "get_Name", Some(fresh), Vec::new())
        .unwrap();
    assert_eq!(name, Value::Null);
    assert!(node_a.contains("Sample.Account.Name"));

    // Messages arrive in order, so once a later store lands the null one was seen too.
    let calculator = woven(CALCULATOR, WeaveConfig::default());
    let calc_a = interpreter(&calculator, node_a.clone());
    calc(&calc_a, 7, 7);
    assert!(wait_until(|| node_b.contains("Sample.Calculator.Calc_7_7")));
    assert!(!node_b.contains("Sample.Account.Name"));

    node_a.shutdown();
    node_b.shutdown();
}
