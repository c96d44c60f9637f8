//! Dependency Resolver - アプリのインストール順を決める
//!
//! Design:
//! - Edges: app -> apps it depends on, in catalog declaration order
//! - The graph is fetched from the `AppCatalog` first, then traversed purely
//! - A cycle is a hard error: no partial order is ever returned

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::domain::{CycleError, JobError, ValidationError};
use crate::ports::{AppCatalog, CatalogError};

/// DFS node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// on the current path
    Gray,
    /// fully explored, already in the output
    Black,
}

/// Direct dependencies of every app reachable from a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `app` with its direct dependencies (replaces earlier ones).
    pub fn insert(&mut self, app: impl Into<String>, deps: Vec<String>) {
        self.edges.insert(app.into(), deps);
    }

    pub fn dependencies(&self, app: &str) -> &[String] {
        self.edges.get(app).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Fetch every app reachable from `root`, one catalog call per app.
    ///
    /// Does not recurse, so cyclic catalogs load fine and fail in `resolve`.
    pub async fn load(catalog: &dyn AppCatalog, root: &str) -> Result<Self, CatalogError> {
        let mut graph = Self::new();
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(app) = queue.pop_front() {
            if graph.edges.contains_key(&app) {
                continue;
            }
            let deps = catalog.get_dependencies(&app).await?;
            for dep in &deps {
                if !graph.edges.contains_key(dep) {
                    queue.push_back(dep.clone());
                }
            }
            graph.edges.insert(app, deps);
        }
        Ok(graph)
    }

    /// Install order for `app`: dependencies first, `app` last, each name once.
    ///
    /// Apps missing from the graph are treated as leaves.
    pub fn resolve(&self, app: &str) -> Result<Vec<String>, CycleError> {
        let mut colors: HashMap<&str, Color> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        let mut order = Vec::new();
        self.visit(app, &mut colors, &mut path, &mut order)?;
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        app: &'a str,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), CycleError> {
        match colors.get(app) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => {
                // path holds the chain from the root; the cycle starts at `app`
                let start = path.iter().position(|p| *p == app).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(app.to_string());
                return Err(CycleError { cycle });
            }
            None => {}
        }

        colors.insert(app, Color::Gray);
        path.push(app);
        for dep in self.dependencies(app) {
            self.visit(dep, colors, path, order)?;
        }
        path.pop();
        colors.insert(app, Color::Black);
        order.push(app.to_string());
        Ok(())
    }
}

/// Catalog-backed resolver used by the `deploy-app` handler.
#[derive(Clone)]
pub struct DependencyResolver {
    catalog: Arc<dyn AppCatalog>,
}

impl DependencyResolver {
    pub fn new(catalog: Arc<dyn AppCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn resolve(&self, app: &str) -> Result<Vec<String>, JobError> {
        let graph = DependencyGraph::load(self.catalog.as_ref(), app)
            .await
            .map_err(catalog_error)?;
        let order = graph.resolve(app)?;
        tracing::debug!(app, order = ?order, "dependencies resolved");
        Ok(order)
    }
}

fn catalog_error(err: CatalogError) -> JobError {
    match err {
        CatalogError::UnknownApp(app) => {
            ValidationError::MissingPrecondition(format!("unknown application '{app}'")).into()
        }
        CatalogError::Backend(reason) => JobError::execution(format!("catalog: {reason}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::StaticCatalog;
    use rstest::rstest;

    const NO_DEPS: [&str; 0] = [];

    /// `("app", "dep1 dep2")` pairs; an empty string means no dependencies.
    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (app, deps) in edges {
            graph.insert(*app, deps.split_whitespace().map(str::to_string).collect());
        }
        graph
    }

    #[test]
    fn dependencies_come_first_requested_app_last() {
        let g = graph(&[("n8n", "postgres redis"), ("postgres", ""), ("redis", "")]);
        assert_eq!(g.resolve("n8n").unwrap(), vec!["postgres", "redis", "n8n"]);
    }

    #[test]
    fn app_without_dependencies_resolves_to_itself() {
        let g = graph(&[("redis", "")]);
        assert_eq!(g.resolve("redis").unwrap(), vec!["redis"]);
        assert_eq!(DependencyGraph::new().resolve("ghost").unwrap(), vec!["ghost"]);
    }

    #[test]
    fn diamond_lists_shared_dependency_once() {
        let g = graph(&[("app", "a b"), ("a", "base"), ("b", "base"), ("base", "")]);
        assert_eq!(g.resolve("app").unwrap(), vec!["base", "a", "b", "app"]);
    }

    #[rstest]
    #[case::pair(vec![("x", "y"), ("y", "x")], "x", vec!["x", "y", "x"])]
    #[case::self_loop(vec![("x", "x")], "x", vec!["x", "x"])]
    #[case::inner(
        vec![("top", "b"), ("b", "c"), ("c", "d"), ("d", "b")],
        "top",
        vec!["b", "c", "d", "b"]
    )]
    fn cycles_are_reported_with_their_path(
        #[case] edges: Vec<(&str, &str)>,
        #[case] root: &str,
        #[case] expected: Vec<&str>,
    ) {
        let err = graph(&edges).resolve(root).unwrap_err();
        assert_eq!(err.cycle, expected);
    }

    #[test]
    fn every_dependency_precedes_its_dependents() {
        let g = graph(&[
            ("web", "api cdn"),
            ("api", "db cache"),
            ("cdn", "cache"),
            ("cache", ""),
            ("db", ""),
        ]);
        let order = g.resolve("web").unwrap();
        let pos = |name: &str| order.iter().position(|o| o == name).unwrap();
        for app in ["web", "api", "cdn"] {
            for dep in g.dependencies(app) {
                assert!(pos(dep) < pos(app), "{dep} must come before {app}");
            }
        }
        assert_eq!(order.last().map(String::as_str), Some("web"));
        assert_eq!(order.len(), 5);
    }

    #[tokio::test]
    async fn resolver_loads_graph_from_catalog() {
        let catalog = StaticCatalog::new()
            .with_app("n8n", ["postgres", "redis"])
            .with_app("postgres", NO_DEPS)
            .with_app("redis", NO_DEPS);
        let resolver = DependencyResolver::new(Arc::new(catalog));
        assert_eq!(
            resolver.resolve("n8n").await.unwrap(),
            vec!["postgres", "redis", "n8n"]
        );
    }

    #[tokio::test]
    async fn resolver_maps_cycle_and_unknown_app() {
        let catalog = StaticCatalog::new()
            .with_app("x", ["y"])
            .with_app("y", ["x"]);
        let resolver = DependencyResolver::new(Arc::new(catalog));

        let err = resolver.resolve("x").await.unwrap_err();
        assert!(matches!(err, JobError::Cycle(_)));

        let err = resolver.resolve("nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::domain::ErrorKind::Validation);
    }
}
