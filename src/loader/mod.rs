//! Bulk loading into a dataset
//!
//! Loading into empty tables takes the fast path: secondary indexes are
//! dropped, every input tuple goes into the primary index only, and the
//! secondaries are rebuilt from the primary once the input is exhausted.
//! Statistics are collected along the way when asked for. Loading into a
//! table that already holds data updates every index per tuple, like any
//! other add, and collects no statistics.

pub mod index_build;
pub mod progress;

use std::time::Duration;

use oxigraph::model::Term;
use tracing::{info, warn};

use crate::core::{default_graph_name, is_default_graph, is_union_graph, Quad, Triple};
use crate::dataset::Dataset;
use crate::error::{Result, StoreError};
use crate::stats::{Statistics, StatsCollector};
use crate::storage::node_tuple_table::{NodeTupleTable, TableObserver};

pub use index_build::IndexBuild;
pub use progress::ProgressMonitor;

#[derive(Clone, Debug)]
pub struct LoaderOptions {
    /// How absent secondary indexes are rebuilt
    pub strategy: IndexBuild,
    /// Collect and persist predicate statistics on the fast path
    pub collect_stats: bool,
    /// Tuples between progress lines; 0 disables them
    pub tick: u64,
    /// Ticks between elapsed-time lines
    pub super_tick: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            strategy: IndexBuild::default(),
            collect_stats: true,
            tick: 50_000,
            super_tick: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    Loading,
    IndexBuild,
    Synced,
}

/// Where loaded tuples go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadTarget {
    DefaultGraph,
    /// Every tuple is placed in this graph, whatever graph it came with
    NamedGraph(Term),
    /// Quads keep their own graph; default-graph quads go to the triple table
    Dataset,
}

impl LoadTarget {
    /// The reserved default graph name given as a named graph means the default graph.
    fn normalized(self) -> Self {
        match self {
            LoadTarget::NamedGraph(name) if is_default_graph(&name) => LoadTarget::DefaultGraph,
            other => other,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    pub tuples_seen: u64,
    pub tuples_added: u64,
    pub load_time: Duration,
    pub index_time: Duration,
    pub statistics: Option<Statistics>,
}

#[derive(Debug)]
pub struct BulkLoader {
    dataset: Dataset,
    options: LoaderOptions,
    state: LoaderState,
}

/// A table taking part in one load, with its collector on the fast path
struct Participant<'a> {
    table: &'a NodeTupleTable,
    collector: Option<StatsCollector>,
}

impl BulkLoader {
    pub fn new(dataset: Dataset, options: LoaderOptions) -> Self {
        Self {
            dataset,
            options,
            state: LoaderState::Idle,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    fn set_state(&mut self, state: LoaderState) {
        info!("Loader state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Load triples into the default graph or a named graph.
    pub fn load_triples<I>(&mut self, target: LoadTarget, triples: I) -> Result<LoadReport>
    where
        I: IntoIterator<Item = Result<Triple>>,
    {
        let target = target.normalized();
        let graph = match &target {
            LoadTarget::NamedGraph(name) => name.clone(),
            _ => default_graph_name(),
        };
        self.load(
            target,
            triples
                .into_iter()
                .map(move |triple| triple.map(|t| t.in_graph(graph.clone()))),
        )
    }

    /// Load quads into the dataset, each into its own graph.
    pub fn load_quads<I>(&mut self, quads: I) -> Result<LoadReport>
    where
        I: IntoIterator<Item = Result<Quad>>,
    {
        self.load(LoadTarget::Dataset, quads)
    }

    pub fn load<I>(&mut self, target: LoadTarget, quads: I) -> Result<LoadReport>
    where
        I: IntoIterator<Item = Result<Quad>>,
    {
        self.dataset.check_open()?;
        let target = target.normalized();
        if let LoadTarget::NamedGraph(name) = &target {
            if is_union_graph(name) {
                return Err(StoreError::Unsupported(format!("cannot load into {name}")));
            }
        }

        let dataset = self.dataset.clone();
        let tables: Vec<&NodeTupleTable> = match &target {
            LoadTarget::DefaultGraph => vec![dataset.triple_table()],
            LoadTarget::NamedGraph(_) => vec![dataset.quad_table()],
            LoadTarget::Dataset => vec![dataset.triple_table(), dataset.quad_table()],
        };
        let bulk = tables.iter().all(|table| table.is_empty());
        let participants: Vec<Participant<'_>> = tables
            .into_iter()
            .map(|table| Participant {
                table,
                collector: (bulk && self.options.collect_stats)
                    .then(|| StatsCollector::new(table.arity())),
            })
            .collect();

        if bulk {
            for participant in &participants {
                participant.table.tuples().drop_secondaries();
            }
            info!(
                "Bulk load into empty tables with the {} index build",
                self.options.strategy
            );
        } else {
            info!("Incremental load: target holds data, indexes are updated per tuple");
        }

        self.set_state(LoaderState::Loading);
        let monitor = ProgressMonitor::new("Load", self.options.tick, self.options.super_tick);
        let mut report = LoadReport::default();
        let loaded = load_all(&target, &participants, quads, &monitor, &mut report);
        report.load_time = monitor.finish();

        if bulk {
            self.set_state(LoaderState::IndexBuild);
            let monitor = ProgressMonitor::new("Index", self.options.tick, self.options.super_tick);
            let mut rebuilt = Ok(());
            for participant in &participants {
                if let Err(err) = participant
                    .table
                    .tuples()
                    .rebuild_secondaries(self.options.strategy, &monitor)
                {
                    rebuilt = Err(err);
                    break;
                }
            }
            report.index_time = monitor.finish();
            if let Err(err) = loaded {
                if let Err(rebuild_err) = rebuilt {
                    warn!("Index rebuild after a failed load also failed: {rebuild_err}");
                }
                self.set_state(LoaderState::Idle);
                return Err(err);
            }
            rebuilt?;
        } else if let Err(err) = loaded {
            self.set_state(LoaderState::Idle);
            return Err(err);
        }

        let collectors: Vec<&StatsCollector> = participants
            .iter()
            .filter_map(|p| p.collector.as_ref())
            .collect();
        if !collectors.is_empty() {
            let statistics = StatsCollector::finish_all(&collectors, dataset.nodes())?;
            info!(
                "Statistics: {} tuples over {} predicates",
                statistics.total(),
                statistics.predicate_count()
            );
            dataset.install_statistics(statistics.clone())?;
            report.statistics = Some(statistics);
        }

        dataset.sync(true)?;
        self.set_state(LoaderState::Synced);
        info!(
            "Loaded {} of {} tuples in {:.2}s (index build {:.2}s)",
            report.tuples_added,
            report.tuples_seen,
            report.load_time.as_secs_f64(),
            report.index_time.as_secs_f64()
        );
        Ok(report)
    }
}

fn load_all<I>(
    target: &LoadTarget,
    participants: &[Participant<'_>],
    quads: I,
    monitor: &ProgressMonitor,
    report: &mut LoadReport,
) -> Result<()>
where
    I: IntoIterator<Item = Result<Quad>>,
{
    for quad in quads {
        let quad = quad?;
        report.tuples_seen += 1;
        let Quad {
            graph,
            subject,
            predicate,
            object,
        } = quad;

        let (participant, terms) = match target {
            LoadTarget::DefaultGraph => (&participants[0], vec![subject, predicate, object]),
            LoadTarget::NamedGraph(name) => (
                &participants[0],
                vec![name.clone(), subject, predicate, object],
            ),
            LoadTarget::Dataset if is_default_graph(&graph) => {
                (&participants[0], vec![subject, predicate, object])
            }
            LoadTarget::Dataset if is_union_graph(&graph) => {
                return Err(StoreError::Unsupported(format!("cannot load into {graph}")));
            }
            LoadTarget::Dataset => (&participants[1], vec![graph, subject, predicate, object]),
        };

        let observer = participant
            .collector
            .as_ref()
            .map(|c| c as &dyn TableObserver);
        if participant.table.add_observed(&terms, observer)? {
            report.tuples_added += 1;
        }
        monitor.tick();
    }
    Ok(())
}
