use bencher::{TestCase, TestFile};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use http::Method;
use micro_rest::Router;
use micro_rest::router::RouteSpec;
use std::hint::black_box;

static SMALL_TABLE: TestFile = TestFile::new("small.txt", include_str!("../resources/routes/small.txt"));
static LARGE_TABLE: TestFile = TestFile::new("large.txt", include_str!("../resources/routes/large.txt"));

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::small("static_hit", SMALL_TABLE, "GET", "/health"),
        TestCase::small("param_hit", SMALL_TABLE, "PUT", "/users/42"),
        TestCase::small("method_not_allowed", SMALL_TABLE, "PATCH", "/users/42"),
        TestCase::large("last_param_hit", LARGE_TABLE, "DELETE", "/runners/7/comments/9"),
        TestCase::large("wildcard_hit", LARGE_TABLE, "GET", "/assets/css/site.css"),
        TestCase::large("not_found", LARGE_TABLE, "GET", "/nothing/here"),
    ]
}

fn mount_table(file: &TestFile) -> Router {
    let mut router = Router::new();
    for (method, path) in file.routes() {
        let method = Method::from_bytes(method.as_bytes()).expect("route table method should be valid");
        router.mount(RouteSpec::new(method, path)).expect("route table pattern should be valid");
    }
    router
}

fn benchmark_router_find(criterion: &mut Criterion) {
    let test_cases = create_test_cases();
    let mut group = criterion.benchmark_group("router_find");

    for case in test_cases {
        let router = mount_table(case.file());
        let method = Method::from_bytes(case.method().as_bytes()).expect("test case method should be valid");
        let id = format!("{}/{:?}", case.name(), case.group());
        group.bench_with_input(BenchmarkId::from_parameter(id), &case, |b, case| {
            b.iter(|| black_box(router.find(&method, case.path(), "*")));
        });
    }

    group.finish();
}

criterion_group!(router, benchmark_router_find);
criterion_main!(router);
