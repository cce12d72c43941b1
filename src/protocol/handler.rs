//! Per-connection sessions and verb dispatch.
//!
//! Each accepted connection gets its own session (and thread). Commands
//! are handled strictly in order on that connection; state shared between
//! connections lives in the project manager behind the project locks.
//!
//! A fit follows the weak-write pattern: the snapshot is taken under the
//! project's shared lock, the fit runs without any lock, and the exclusive
//! lock is only taken to merge the shadow encoding and publish the fitted
//! pipeline. Dropping the connection mid-fit cancels the fit at its next
//! barrier and the partial state is discarded.

use std::io::{Read, Write};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::cancel::{CancelOnDrop, CancelToken};
use crate::containers::column::{Column, Role};
use crate::containers::encoding::NULL_CODE;
use crate::containers::schema::FrameSchema;
use crate::engine::ProjectManager;
use crate::error::{Error, Result};
use crate::expressions;
use crate::pipeline::{metrics, Pipeline};
use crate::project::Project;
use crate::protocol::commands::{self, Envelope};
use crate::protocol::{wire, SUCCESS};
use crate::storage::{self, CsvOptions};

/// Verb families that belong to external collaborators and are not served
/// by this engine.
const EXTERNAL_VERBS: [&str; 8] = [
    "Database.",
    "DataFrame.from_db",
    "DataFrame.from_json",
    "DataFrame.from_query",
    "DataFrame.to_db",
    "DataFrame.group_by",
    "DataFrame.join",
    "monitor.",
];

pub struct Session {
    manager: Arc<ProjectManager>,
    shutdown: Sender<()>,
    project: Option<(String, Arc<Project>)>,
    cancel: CancelToken,
}

/// Serves one connection until the peer disconnects or shuts the daemon
/// down.
pub fn handle_connection<S: Read + Write>(
    manager: Arc<ProjectManager>,
    shutdown: Sender<()>,
    stream: &mut S,
) {
    let mut session = Session {
        manager,
        shutdown,
        project: None,
        cancel: CancelToken::new(),
    };
    let mut guard = CancelOnDrop::new(session.cancel.clone());

    loop {
        let max = session.manager.config().server.max_command_size;
        let value = match wire::read_json(stream, max) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "connection closed");
                break;
            }
        };
        match session.dispatch(&value, stream) {
            Ok(true) => {}
            Ok(false) => {
                guard.disarm();
                break;
            }
            Err(e) => {
                warn!(error = %e, "command failed");
                if wire::write_string(stream, &e.to_string()).is_err() {
                    break;
                }
            }
        }
    }
}

impl Session {
    fn max_size(&self) -> usize {
        self.manager.config().server.max_command_size
    }

    fn project(&self) -> Result<&Arc<Project>> {
        self.project
            .as_ref()
            .map(|(_, p)| p)
            .ok_or_else(|| Error::InvalidArgument("no project set (call set_project)".to_string()))
    }

    fn project_name(&self) -> Result<&str> {
        self.project
            .as_ref()
            .map(|(name, _)| name.as_str())
            .ok_or_else(|| Error::InvalidArgument("no project set (call set_project)".to_string()))
    }

    /// Handles one command. Returns `false` when the daemon should shut
    /// down.
    pub fn dispatch<S: Read + Write>(
        &mut self,
        value: &serde_json::Value,
        stream: &mut S,
    ) -> Result<bool> {
        let envelope = Envelope::parse(value)?;
        let verb = envelope.type_.as_str();
        debug!(verb, target = %envelope.name_, "dispatching");

        if let Some(prefix) = EXTERNAL_VERBS.iter().find(|p| verb.starts_with(*p)) {
            return Err(Error::InvalidArgument(format!(
                "'{verb}' is handled by an external collaborator ({prefix}*) and is not served by this engine"
            )));
        }

        match verb {
            // Session management
            "is_alive" => {
                wire::write_string(stream, SUCCESS)?;
            }
            "shutdown" => {
                info!("shutdown requested");
                wire::write_string(stream, SUCCESS)?;
                let _ = self.shutdown.send(());
                return Ok(false);
            }
            "set_project" => {
                let project = self.manager.set_project(&envelope.name_)?;
                self.project = Some((envelope.name_.clone(), project));
                wire::write_string(stream, SUCCESS)?;
            }
            "delete_project" => {
                self.manager.delete_project(&envelope.name_)?;
                if self.project_name().map(|n| n == envelope.name_).unwrap_or(false) {
                    self.project = None;
                }
                wire::write_string(stream, SUCCESS)?;
            }
            "list_projects" => {
                let names = self.manager.list_projects()?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(names))?;
            }
            "list_data_frames" => {
                let project = self.project()?;
                let mut names: Vec<String> =
                    project.state.read().frames.keys().cloned().collect();
                names.sort();
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(names))?;
            }
            "list_pipelines" => {
                let project = self.project()?;
                let mut names: Vec<String> =
                    project.state.read().pipelines.keys().cloned().collect();
                names.sort();
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(names))?;
            }

            // DataFrame family
            "DataFrame.from_csv" => {
                let cmd: commands::FromCsvCmd = commands::body(value, verb)?;
                let options = CsvOptions {
                    delimiter: cmd.delimiter.unwrap_or(','),
                    has_header: cmd.has_header,
                    ..CsvOptions::default()
                };
                let project = self.project()?.clone();
                let mut state = project.state.write();
                let state = &mut *state;
                let frame = storage::read_csv(
                    std::path::Path::new(&cmd.fname),
                    &envelope.name_,
                    &cmd.roles,
                    &options,
                    &mut state.categories,
                    &mut state.join_keys_encoding,
                )?;
                state.frames.insert(envelope.name_.clone(), frame);
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.to_csv" => {
                let cmd: commands::ToCsvCmd = commands::body(value, verb)?;
                let options = CsvOptions {
                    delimiter: cmd.delimiter.unwrap_or(','),
                    ..CsvOptions::default()
                };
                let project = self.project()?;
                let state = project.state.read();
                let frame = state.frame(&envelope.name_)?;
                storage::write_csv(
                    std::path::Path::new(&cmd.fname),
                    frame,
                    &options,
                    &state.categories,
                    &state.join_keys_encoding,
                )?;
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.add_column" => {
                let cmd: commands::AddColumnCmd = commands::body(value, verb)?;
                let role = Role::parse(&cmd.role)?;
                if !role.is_float() {
                    return Err(Error::InvalidArgument(format!(
                        "role '{role}' needs add_categorical_column"
                    )));
                }
                let values = wire::read_floats(stream, self.max_size())?;
                let column = Column::new(cmd.column_name, values)
                    .with_unit(cmd.unit)
                    .with_subroles(cmd.subroles);
                let project = self.project()?.clone();
                let mut state = project.state.write();
                state
                    .frames
                    .entry(envelope.name_.clone())
                    .or_insert_with(|| crate::containers::frame::DataFrame::new(&envelope.name_));
                state.frame_mut(&envelope.name_)?.add_float_column(role, column)?;
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.add_categorical_column" => {
                let cmd: commands::AddColumnCmd = commands::body(value, verb)?;
                let role = Role::parse(&cmd.role)?;
                if role.is_float() {
                    return Err(Error::InvalidArgument(format!(
                        "role '{role}' needs add_column"
                    )));
                }
                let strings = wire::read_string_column(stream, self.max_size())?;
                let project = self.project()?.clone();
                let mut state = project.state.write();
                let codes: Vec<i32> = strings
                    .iter()
                    .map(|s| match s {
                        Some(s) => {
                            if role == Role::JoinKey {
                                state.join_keys_encoding.intern(s)
                            } else {
                                state.categories.intern(s)
                            }
                        }
                        None => NULL_CODE,
                    })
                    .collect();
                let column = Column::new(cmd.column_name, codes)
                    .with_unit(cmd.unit)
                    .with_subroles(cmd.subroles);
                state
                    .frames
                    .entry(envelope.name_.clone())
                    .or_insert_with(|| crate::containers::frame::DataFrame::new(&envelope.name_));
                state.frame_mut(&envelope.name_)?.add_int_column(role, column)?;
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.append" => {
                let cmd: commands::AppendCmd = commands::body(value, verb)?;
                let project = self.project()?.clone();
                let mut state = project.state.write();
                let other = state.frame(&cmd.other)?.clone();
                let target = state.frame(&envelope.name_)?;
                let merged = target.append(&other)?;
                state.frames.insert(envelope.name_.clone(), merged);
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.remove_column" => {
                let cmd: commands::RemoveColumnCmd = commands::body(value, verb)?;
                let project = self.project()?.clone();
                let mut state = project.state.write();
                state
                    .frame_mut(&envelope.name_)?
                    .remove_column(&cmd.column_name)?;
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.nrows" => {
                let project = self.project()?;
                let nrows = project.state.read().frame(&envelope.name_)?.nrows();
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(nrows))?;
            }
            "DataFrame.nbytes" => {
                let project = self.project()?;
                let nbytes = project.state.read().frame(&envelope.name_)?.nbytes();
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(nbytes))?;
            }
            "DataFrame.refresh" => {
                let project = self.project()?;
                let state = project.state.read();
                let schema = FrameSchema::of(state.frame(&envelope.name_)?);
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(schema)?)?;
            }
            "DataFrame.where" => {
                let cmd: commands::WhereCmd = commands::body(value, verb)?;
                let project = self.project()?.clone();
                let mut state = project.state.write();
                let frame = state.frame(&envelope.name_)?;
                let mask = expressions::eval_bool(&cmd.condition, frame, &state.categories)?;
                let mut view = frame.where_mask(&mask)?;
                view.name = cmd.new_df.clone();
                state.frames.insert(cmd.new_df, view);
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.summarize" => {
                let project = self.project()?;
                let state = project.state.read();
                let frame = state.frame(&envelope.name_)?;
                let summary = summarize(frame);
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &summary)?;
            }
            "DataFrame.save" => {
                let project = self.project()?;
                let dir = self
                    .manager
                    .project_dir(self.project_name()?)
                    .join("data")
                    .join(&envelope.name_);
                let state = project.state.read();
                let frame = state.frame(&envelope.name_)?;
                storage::save_frame(&dir, frame)?;
                drop(state);
                self.manager.save_project(self.project_name()?)?;
                wire::write_string(stream, SUCCESS)?;
            }
            "DataFrame.load" => {
                let dir = self
                    .manager
                    .project_dir(self.project_name()?)
                    .join("data")
                    .join(&envelope.name_);
                let frame = storage::load_frame(&dir)?;
                let project = self.project()?.clone();
                project
                    .state
                    .write()
                    .frames
                    .insert(envelope.name_.clone(), frame);
                wire::write_string(stream, SUCCESS)?;
            }

            // Column family
            "FloatColumn.get" => {
                let cmd: commands::GetFloatColumnCmd = commands::body(value, verb)?;
                let project = self.project()?;
                let state = project.state.read();
                let frame = state.frame(&cmd.df_name)?;
                let column = expressions::eval_float(&cmd.expression, frame, &state.categories)?;
                let values: Vec<f64> = column.iter().collect();
                wire::write_string(stream, SUCCESS)?;
                wire::write_floats(stream, &values)?;
            }
            "StringColumn.get_string" => {
                let cmd: commands::GetStringColumnCmd = commands::body(value, verb)?;
                let project = self.project()?;
                let state = project.state.read();
                let frame = state.frame(&cmd.df_name)?;
                let strings =
                    expressions::eval_string(&cmd.expression, frame, &state.categories)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_string_column(stream, &strings)?;
            }
            "FloatColumn.get_unit" | "StringColumn.get_unit" => {
                let cmd: commands::GetUnitCmd = commands::body(value, verb)?;
                let project = self.project()?;
                let state = project.state.read();
                let frame = state.frame(&cmd.df_name)?;
                let unit = frame
                    .float_column(&cmd.column_name)
                    .map(|c| c.unit.clone())
                    .or_else(|| frame.int_column(&cmd.column_name).map(|c| c.unit.clone()))
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "column '{}' in frame '{}'",
                            cmd.column_name, cmd.df_name
                        ))
                    })?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(unit))?;
            }
            "FloatColumn.set_unit" | "StringColumn.set_unit" => {
                let cmd: commands::SetUnitCmd = commands::body(value, verb)?;
                let project = self.project()?.clone();
                let mut state = project.state.write();
                let frame = state.frame_mut(&cmd.df_name)?;
                if let Some(col) = frame.float_column_mut(&cmd.column_name) {
                    col.unit = cmd.unit;
                } else if let Some(col) = frame.int_column_mut(&cmd.column_name) {
                    col.unit = cmd.unit;
                } else {
                    return Err(Error::NotFound(format!(
                        "column '{}' in frame '{}'",
                        cmd.column_name, cmd.df_name
                    )));
                }
                wire::write_string(stream, SUCCESS)?;
            }

            // Pipeline family
            "Pipeline" => {
                let cmd: commands::PipelineCmd = commands::body(value, verb)?;
                let mut pipeline = Pipeline::new(
                    cmd.data_model,
                    cmd.preprocessors,
                    cmd.feature_learners,
                    cmd.predictor.unwrap_or_default(),
                );
                pipeline.feature_selector = cmd.feature_selector;
                pipeline.apply_resource_limits(
                    self.manager.config().engine.criterion_storage_capacity,
                );
                let project = self.project()?.clone();
                project
                    .state
                    .write()
                    .pipelines
                    .insert(envelope.name_.clone(), pipeline);
                wire::write_string(stream, SUCCESS)?;
            }
            "Pipeline.check" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let findings = pipeline.check(&state.frames)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(findings))?;
            }
            "Pipeline.fit" => {
                let report = self.fit_pipeline(&envelope.name_)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(report)?)?;
            }
            "Pipeline.transform" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let matrix = pipeline.transform(&state.frames, &state.categories)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(&matrix)?)?;
            }
            "Pipeline.score" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let scores = pipeline.score(&state.frames, &state.categories)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(scores)?)?;
            }
            "Pipeline.to_sql" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let statements = pipeline.to_sql(&state.categories)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::json!(statements.join("\n\n")))?;
            }
            "Pipeline.to_json" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &pipeline.to_json()?)?;
            }
            "Pipeline.feature_importances" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let importances = pipeline.feature_importances()?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(importances)?)?;
            }
            "Pipeline.column_importances" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let importances = pipeline.column_importances()?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(importances)?)?;
            }
            "Pipeline.feature_correlations" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                let correlations =
                    pipeline.feature_correlations(&state.frames, &state.categories)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(correlations)?)?;
            }
            "Pipeline.roc_curve" | "Pipeline.precision_recall_curve" | "Pipeline.lift_curve" => {
                let cmd: commands::CurveCmd = commands::body(value, verb)?;
                let (y, p) = self.curve_inputs(&envelope.name_, cmd.target_num)?;
                let curve = match verb {
                    "Pipeline.roc_curve" => metrics::roc_curve(&y, &p),
                    "Pipeline.precision_recall_curve" => metrics::precision_recall_curve(&y, &p),
                    _ => metrics::lift_curve(&y, &p),
                };
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(stream, &serde_json::to_value(curve)?)?;
            }
            "Pipeline.refresh" => {
                let project = self.project()?;
                let state = project.state.read();
                let pipeline = state.pipeline(&envelope.name_)?;
                wire::write_string(stream, SUCCESS)?;
                wire::write_json(
                    stream,
                    &serde_json::json!({ "is_fitted": pipeline.is_fitted() }),
                )?;
            }

            other => {
                return Err(Error::InvalidArgument(format!("unknown command '{other}'")));
            }
        }
        Ok(true)
    }

    /// The weak-write fit: snapshot under the shared lock, fit unlocked,
    /// commit under the exclusive lock.
    fn fit_pipeline(&self, name: &str) -> Result<crate::pipeline::FitReport> {
        let project = self.project()?.clone();

        let (frames, mut shadow, mut pipeline) = {
            let state = project.state.read();
            let (frames, shadow) = state.fit_snapshot();
            (frames, shadow, state.pipeline(name)?.clone())
        };

        let report = pipeline.fit(&frames, &mut shadow, &self.cancel)?;

        {
            let mut state = project.state.write();
            let remap = shadow.merge_into(&mut state.categories);
            pipeline.rewrite_categories(&remap);
            state.pipelines.insert(name.to_string(), pipeline);
        }
        self.manager.save_project(self.project_name()?)?;
        Ok(report)
    }

    fn curve_inputs(&self, pipeline_name: &str, target_num: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        let project = self.project()?;
        let state = project.state.read();
        let pipeline = state.pipeline(pipeline_name)?;
        let predictions = pipeline.predict(&state.frames, &state.categories)?;
        let p = predictions.into_iter().nth(target_num).ok_or_else(|| {
            Error::InvalidArgument(format!("no target {target_num} in pipeline '{pipeline_name}'"))
        })?;

        let population = state.frame(&pipeline.data_model.name)?;
        let target = population.targets.get(target_num).ok_or_else(|| {
            Error::NotFound(format!(
                "target {target_num} in frame '{}'",
                population.name
            ))
        })?;
        Ok((target.iter().collect(), p))
    }
}

/// Per-column summary statistics.
fn summarize(frame: &crate::containers::frame::DataFrame) -> serde_json::Value {
    let mut columns = Vec::new();
    for (role, bucket) in [
        ("discrete", &frame.discretes),
        ("numerical", &frame.numericals),
        ("target", &frame.targets),
        ("time_stamp", &frame.time_stamps),
        ("unused_float", &frame.unused_floats),
    ] {
        for col in bucket {
            let values: Vec<f64> = col.iter().collect();
            columns.push(serde_json::json!({
                "name": col.name,
                "role": role,
                "count": crate::aggregations::count(&values),
                "mean": nan_to_null(crate::aggregations::avg(&values)),
                "min": nan_to_null(crate::aggregations::minimum(&values)),
                "max": nan_to_null(crate::aggregations::maximum(&values)),
                "stddev": nan_to_null(crate::aggregations::stddev(&values)),
            }));
        }
    }
    for (role, bucket) in [
        ("categorical", &frame.categoricals),
        ("join_key", &frame.join_keys),
        ("text", &frame.texts),
        ("unused_string", &frame.unused_strings),
    ] {
        for col in bucket {
            let codes: Vec<i32> = col.iter().collect();
            columns.push(serde_json::json!({
                "name": col.name,
                "role": role,
                "count": crate::aggregations::count_codes(&codes),
                "distinct": crate::aggregations::count_distinct_codes(&codes),
            }));
        }
    }
    serde_json::json!({ "name": frame.name, "nrows": frame.nrows(), "columns": columns })
}

fn nan_to_null(value: f64) -> serde_json::Value {
    if value.is_finite() {
        serde_json::json!(value)
    } else {
        serde_json::Value::Null
    }
}
