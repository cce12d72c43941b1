//! The pipeline: preprocessors -> feature learners -> predictors.
//!
//! A fit resolves the frames named by the data model, runs the enabled
//! preprocessors in declared order, trains the feature learners on the
//! preprocessed bundle, materialises the feature matrix and trains one
//! predictor per target. The fitted pipeline snapshots the raw frame
//! schemas and rejects transform inputs that are not a superset (by name
//! and role) or that disagree on declared units. A pipeline that has never
//! been fit rejects transform and score.

pub mod metrics;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cancel::CancelToken;
use crate::containers::encoding::{Encoding, EncodingShadow};
use crate::containers::frame::DataFrame;
use crate::containers::join_graph::{JoinGraph, PlaceholderSpec};
use crate::containers::matrix::FeatureMatrix;
use crate::containers::schema::FrameSchema;
use crate::error::{Error, Result};
use crate::fastprop::FastPropModel;
use crate::predictors::Predictor;
use crate::preprocessors::{user_column_of, Preprocessor};
use crate::relboost::RelboostModel;
use crate::sql::JoinPath;

use metrics::Scores;

/// The tagged sum of feature learners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type_")]
pub enum FeatureLearner {
    FastProp(FastPropModel),
    Relboost(RelboostModel),
}

impl FeatureLearner {
    fn fit(&mut self, frames: &[DataFrame], graph: &JoinGraph) -> Result<FeatureMatrix> {
        match self {
            FeatureLearner::FastProp(model) => {
                let peripherals = root_peripherals(frames, graph);
                model.fit(&frames[0], &peripherals, graph)
            }
            FeatureLearner::Relboost(model) => model.fit(frames, graph),
        }
    }

    fn transform(&self, frames: &[DataFrame], graph: &JoinGraph) -> Result<FeatureMatrix> {
        match self {
            FeatureLearner::FastProp(model) => {
                let peripherals = root_peripherals(frames, graph);
                model.transform(&frames[0], &peripherals, graph)
            }
            FeatureLearner::Relboost(model) => model.transform(frames, graph),
        }
    }

    fn num_features(&self) -> usize {
        match self {
            FeatureLearner::FastProp(model) => model.num_features(),
            FeatureLearner::Relboost(model) => model.num_features(),
        }
    }

    /// The columns a feature draws on, as `(graph_node, column_name,
    /// relative_weight)`.
    fn feature_columns(
        &self,
        feature_ix: usize,
        graph: &JoinGraph,
        schemas: &[FrameSchema],
    ) -> Vec<(usize, String, f64)> {
        match self {
            FeatureLearner::FastProp(model) => {
                let root_children: Vec<usize> = graph.joins_of(0).map(|e| e.child).collect();
                let peripheral_schemas: Vec<FrameSchema> = root_children
                    .iter()
                    .map(|&node| schemas[node].clone())
                    .collect();
                model
                    .feature_columns(feature_ix, &schemas[0], &peripheral_schemas)
                    .into_iter()
                    .map(|(table, name)| {
                        let node = if table == 0 {
                            0
                        } else {
                            root_children[table - 1]
                        };
                        (node, name, 1.0)
                    })
                    .collect()
            }
            FeatureLearner::Relboost(model) => model.feature_columns(feature_ix, schemas),
        }
    }

    fn to_sql(
        &self,
        graph: &JoinGraph,
        schemas: &[FrameSchema],
        categories: &Encoding,
        use_timestamps: bool,
    ) -> Result<Vec<String>> {
        match self {
            FeatureLearner::FastProp(model) => {
                let paths: Vec<JoinPath> = graph
                    .joins_of(0)
                    .map(|edge| {
                        JoinPath::from_edge(&schemas[0].name, &schemas[edge.child].name, edge)
                    })
                    .collect();
                let root_children: Vec<usize> = graph.joins_of(0).map(|e| e.child).collect();
                let peripheral_schemas: Vec<FrameSchema> = root_children
                    .iter()
                    .map(|&node| schemas[node].clone())
                    .collect();
                model
                    .features()
                    .iter()
                    .enumerate()
                    .map(|(ix, feature)| {
                        crate::fastprop::sql::feature_to_sql(
                            feature,
                            ix + 1,
                            categories,
                            &schemas[0],
                            &peripheral_schemas,
                            &paths,
                            use_timestamps,
                        )
                    })
                    .collect()
            }
            FeatureLearner::Relboost(model) => model.to_sql(graph, schemas, categories),
        }
    }
}

/// Everything a fit snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedMeta {
    /// Schemas of the raw input frames, for transform compatibility.
    pub raw_schemas: Vec<FrameSchema>,
    /// Schemas after preprocessing, for SQL emission and importances.
    pub processed_schemas: Vec<FrameSchema>,
    pub feature_names: Vec<String>,
    pub target_names: Vec<String>,
}

/// The report a successful fit returns to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub num_features: usize,
    pub feature_names: Vec<String>,
    pub scores: Vec<Scores>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub data_model: PlaceholderSpec,
    #[serde(default)]
    pub preprocessors: Vec<Preprocessor>,
    pub feature_learners: Vec<FeatureLearner>,
    #[serde(default)]
    pub predictor: Predictor,
    /// Accepted but not wired in: reserved for a two-stage train with a
    /// feature-selection pass before the predictor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_selector: Option<serde_json::Value>,

    #[serde(default)]
    predictors: Vec<Predictor>,
    #[serde(default)]
    fitted: Option<FittedMeta>,
}

/// One entry of the column-importance report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnImportance {
    pub table: String,
    pub column: String,
    pub importance: f64,
}

impl Pipeline {
    pub fn new(
        data_model: PlaceholderSpec,
        preprocessors: Vec<Preprocessor>,
        feature_learners: Vec<FeatureLearner>,
        predictor: Predictor,
    ) -> Self {
        Pipeline {
            data_model,
            preprocessors,
            feature_learners,
            predictor,
            feature_selector: None,
            predictors: Vec::new(),
            fitted: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Caps the learners' candidate-store capacity at the engine-wide
    /// limit; exceeding it triggers the criterion's argsort-prune.
    pub fn apply_resource_limits(&mut self, criterion_storage_capacity: usize) {
        for learner in &mut self.feature_learners {
            if let FeatureLearner::FastProp(model) = learner {
                model.hyper.storage_capacity =
                    model.hyper.storage_capacity.min(criterion_storage_capacity);
            }
        }
    }

    /// Rewrites every category code held by fitted descriptors after the
    /// fit's shadow encoding was merged into the shared one.
    pub fn rewrite_categories(&mut self, remap: &[i32]) {
        for preprocessor in &mut self.preprocessors {
            if let Preprocessor::Mapping(mapping) = preprocessor {
                mapping.rewrite_categories(remap);
            }
        }
        for learner in &mut self.feature_learners {
            match learner {
                FeatureLearner::FastProp(model) => model.rewrite_categories(remap),
                FeatureLearner::Relboost(model) => model.rewrite_categories(remap),
            }
        }
    }

    fn meta(&self) -> Result<&FittedMeta> {
        self.fitted
            .as_ref()
            .ok_or_else(|| Error::NotFitted("this pipeline has not been fit".to_string()))
    }

    fn graph(&self) -> Result<JoinGraph> {
        JoinGraph::from_spec(&self.data_model)
    }

    /// Resolves the frames the data model names, in graph-node order.
    fn resolve_frames(
        &self,
        frames_by_name: &HashMap<String, DataFrame>,
        graph: &JoinGraph,
    ) -> Result<Vec<DataFrame>> {
        graph
            .nodes
            .iter()
            .map(|node| {
                frames_by_name
                    .get(&node.name)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("data frame '{}'", node.name)))
            })
            .collect()
    }

    /// Validates the configuration against concrete frames without
    /// fitting; returns human-readable findings.
    pub fn check(&self, frames_by_name: &HashMap<String, DataFrame>) -> Result<Vec<String>> {
        let graph = self.graph()?;
        let frames = self.resolve_frames(frames_by_name, &graph)?;
        let mut findings = Vec::new();

        if frames[0].targets.is_empty() {
            findings.push(format!(
                "population frame '{}' declares no target column",
                frames[0].name
            ));
        }
        for edge in &graph.edges {
            if let Err(e) =
                crate::matchmaker::ResolvedJoin::resolve(edge, &frames[edge.parent], &frames[edge.child])
            {
                findings.push(e.to_string());
            }
        }
        for frame in &frames {
            if let Err(e) = frame.check_lengths() {
                findings.push(e.to_string());
            }
        }
        Ok(findings)
    }

    /// Fits the whole chain. New category strings land in `categories`
    /// (the fit's shadow); the caller merges the shadow on success.
    pub fn fit(
        &mut self,
        frames_by_name: &HashMap<String, DataFrame>,
        categories: &mut EncodingShadow,
        cancel: &CancelToken,
    ) -> Result<FitReport> {
        let graph = self.graph()?;
        let raw_frames = self.resolve_frames(frames_by_name, &graph)?;
        let raw_schemas: Vec<FrameSchema> = raw_frames.iter().map(FrameSchema::of).collect();

        let targets = raw_frames[0].targets.clone();
        if targets.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "population frame '{}' declares no target",
                raw_frames[0].name
            )));
        }

        info!(
            population = %raw_frames[0].name,
            num_preprocessors = self.preprocessors.len(),
            num_feature_learners = self.feature_learners.len(),
            "pipeline fit started"
        );

        let mut frames = raw_frames;
        for preprocessor in &mut self.preprocessors {
            cancel.check("pipeline fit")?;
            frames = preprocessor.fit(&frames, categories)?;
        }
        let processed_schemas: Vec<FrameSchema> = frames.iter().map(FrameSchema::of).collect();

        let mut matrix = FeatureMatrix::default();
        for (ix, learner) in self.feature_learners.iter_mut().enumerate() {
            cancel.check("pipeline fit")?;
            let mut part = learner.fit(&frames, &graph)?;
            for (k, name) in part.colnames.iter_mut().enumerate() {
                *name = format!("feature_{}_{}", ix + 1, k + 1);
            }
            matrix.hstack(part)?;
        }
        sanitize(&mut matrix);

        cancel.check("pipeline fit")?;
        self.predictors = targets
            .iter()
            .map(|target| {
                let y: Vec<f64> = target.iter().collect();
                let mut predictor = self.predictor.clone();
                predictor.fit(&matrix, &y, None)?;
                Ok(predictor)
            })
            .collect::<Result<Vec<Predictor>>>()?;

        let scores: Vec<Scores> = self
            .predictors
            .iter()
            .zip(&targets)
            .map(|(predictor, target)| {
                let y: Vec<f64> = target.iter().collect();
                let p = predictor.predict(&matrix)?;
                Ok(if predictor.is_classifier() {
                    Scores::classification(&y, &p)
                } else {
                    Scores::regression(&y, &p)
                })
            })
            .collect::<Result<Vec<Scores>>>()?;

        self.fitted = Some(FittedMeta {
            raw_schemas,
            processed_schemas,
            feature_names: matrix.colnames.clone(),
            target_names: targets.iter().map(|t| t.name.clone()).collect(),
        });

        info!(num_features = matrix.ncols(), "pipeline fit done");
        Ok(FitReport {
            num_features: matrix.ncols(),
            feature_names: matrix.colnames,
            scores,
        })
    }

    /// Materialises the feature matrix for compatible frames.
    pub fn transform(
        &self,
        frames_by_name: &HashMap<String, DataFrame>,
        categories: &Encoding,
    ) -> Result<FeatureMatrix> {
        let meta = self.meta()?;
        let graph = self.graph()?;
        let frames = self.resolve_frames(frames_by_name, &graph)?;
        for (schema, frame) in meta.raw_schemas.iter().zip(&frames) {
            schema.check_compatible(frame)?;
        }

        let mut frames = frames;
        for preprocessor in &self.preprocessors {
            frames = preprocessor.transform(&frames, categories)?;
        }

        let mut matrix = FeatureMatrix::default();
        for (ix, learner) in self.feature_learners.iter().enumerate() {
            let mut part = learner.transform(&frames, &graph)?;
            for (k, name) in part.colnames.iter_mut().enumerate() {
                *name = format!("feature_{}_{}", ix + 1, k + 1);
            }
            matrix.hstack(part)?;
        }
        sanitize(&mut matrix);
        Ok(matrix)
    }

    /// Predictions, one vector per target.
    pub fn predict(
        &self,
        frames_by_name: &HashMap<String, DataFrame>,
        categories: &Encoding,
    ) -> Result<Vec<Vec<f64>>> {
        let matrix = self.transform(frames_by_name, categories)?;
        self.predictors
            .iter()
            .map(|predictor| predictor.predict(&matrix))
            .collect()
    }

    /// Scores predictions against the targets present in the population
    /// frame.
    pub fn score(
        &self,
        frames_by_name: &HashMap<String, DataFrame>,
        categories: &Encoding,
    ) -> Result<Vec<Scores>> {
        let meta = self.meta()?;
        let population = frames_by_name
            .get(&self.data_model.name)
            .ok_or_else(|| Error::NotFound(format!("data frame '{}'", self.data_model.name)))?;

        let predictions = self.predict(frames_by_name, categories)?;
        meta.target_names
            .iter()
            .zip(&predictions)
            .zip(&self.predictors)
            .map(|((target_name, p), predictor)| {
                let target = population
                    .targets
                    .iter()
                    .find(|t| &t.name == target_name)
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "target '{}' in frame '{}'",
                            target_name, population.name
                        ))
                    })?;
                let y: Vec<f64> = target.iter().collect();
                if y.len() != p.len() {
                    return Err(Error::Shape(format!(
                        "{} predictions against {} targets",
                        p.len(),
                        y.len()
                    )));
                }
                Ok(if predictor.is_classifier() {
                    Scores::classification(&y, p)
                } else {
                    Scores::regression(&y, p)
                })
            })
            .collect()
    }

    /// Per-feature importances averaged across targets; sums to 1.
    pub fn feature_importances(&self) -> Result<Vec<(String, f64)>> {
        let meta = self.meta()?;
        if self.predictors.is_empty() {
            return Err(Error::NotFitted("this pipeline has not been fit".to_string()));
        }
        let mut sums = vec![0.0; meta.feature_names.len()];
        for predictor in &self.predictors {
            for (sum, value) in sums.iter_mut().zip(predictor.feature_importances()?) {
                *sum += value;
            }
        }
        let n = self.predictors.len() as f64;
        Ok(meta
            .feature_names
            .iter()
            .cloned()
            .zip(sums.into_iter().map(|s| s / n))
            .collect())
    }

    /// Distributes feature importances over the user columns they derive
    /// from. Generated columns are rewritten to their source column by the
    /// inverse naming rule; the result sums to 1.
    pub fn column_importances(&self) -> Result<Vec<ColumnImportance>> {
        let meta = self.meta()?;
        let graph = self.graph()?;
        let feature_importances = self.feature_importances()?;

        let mut accumulated: HashMap<(usize, String), f64> = HashMap::new();
        let mut global_ix = 0;
        for learner in &self.feature_learners {
            for feature_ix in 0..learner.num_features() {
                let importance = feature_importances[global_ix].1;
                global_ix += 1;
                let columns = learner.feature_columns(feature_ix, &graph, &meta.processed_schemas);
                let total_weight: f64 = columns.iter().map(|(_, _, w)| w.abs()).sum();
                if total_weight == 0.0 {
                    continue;
                }
                for (node, name, weight) in columns {
                    let user_column = user_column_of(&name).to_string();
                    *accumulated.entry((node, user_column)).or_insert(0.0) +=
                        importance * weight.abs() / total_weight;
                }
            }
        }

        let total: f64 = accumulated.values().sum();
        let mut out: Vec<ColumnImportance> = accumulated
            .into_iter()
            .map(|((node, column), importance)| ColumnImportance {
                table: meta.raw_schemas[node].name.clone(),
                column,
                importance: if total > 0.0 { importance / total } else { 0.0 },
            })
            .collect();
        out.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.column.cmp(&b.column))
        });
        Ok(out)
    }

    /// Pearson correlation of every feature with every target, on the
    /// given frames.
    pub fn feature_correlations(
        &self,
        frames_by_name: &HashMap<String, DataFrame>,
        categories: &Encoding,
    ) -> Result<Vec<(String, Vec<f64>)>> {
        let meta = self.meta()?;
        let matrix = self.transform(frames_by_name, categories)?;
        let population = frames_by_name
            .get(&self.data_model.name)
            .ok_or_else(|| Error::NotFound(format!("data frame '{}'", self.data_model.name)))?;

        let targets: Vec<Vec<f64>> = meta
            .target_names
            .iter()
            .filter_map(|name| population.targets.iter().find(|t| &t.name == name))
            .map(|t| t.iter().collect())
            .collect();

        Ok(matrix
            .colnames
            .iter()
            .zip(&matrix.columns)
            .map(|(name, column)| {
                let correlations = targets
                    .iter()
                    .map(|y| metrics::pearson(column, y))
                    .collect();
                (name.clone(), correlations)
            })
            .collect())
    }

    /// Renders every fitted feature as portable SQL.
    pub fn to_sql(&self, categories: &Encoding) -> Result<Vec<String>> {
        let meta = self.meta()?;
        let graph = self.graph()?;
        let mut out = Vec::new();
        for learner in &self.feature_learners {
            out.extend(learner.to_sql(&graph, &meta.processed_schemas, categories, true)?);
        }
        Ok(out)
    }

    /// The full pipeline descriptor as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(Into::into)
    }
}

fn root_peripherals(frames: &[DataFrame], graph: &JoinGraph) -> Vec<DataFrame> {
    graph
        .joins_of(0)
        .map(|edge| frames[edge.child].clone())
        .collect()
}

/// Non-finite feature values are not presentable to a predictor.
fn sanitize(matrix: &mut FeatureMatrix) {
    for column in &mut matrix.columns {
        for value in column.iter_mut() {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
    }
}
