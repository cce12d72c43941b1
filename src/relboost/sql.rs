//! SQL emission for fitted Relboost trees.
//!
//! Each tree renders as one `CREATE TABLE "FEATURE_k"` statement whose
//! select aggregates a nested `CASE` expression over the joined rows -
//! every leaf path becomes one branch carrying the leaf weight. Trees of
//! sub-ensembles are emitted first as `SUBFEATURE_*` tables, since main
//! trees may reference their columns.

use crate::containers::column::Role;
use crate::containers::encoding::Encoding;
use crate::containers::join_graph::JoinGraph;
use crate::containers::schema::FrameSchema;
use crate::error::{Error, Result};
use crate::sql::{float_literal, quote, quote_table, string_literal, JoinPath};

use super::split::{Split, SplitColumn};
use super::tree::{Tree, TreeNode};
use super::{RelboostModel, SubEnsemble};

impl RelboostModel {
    /// Renders the whole fitted ensemble, subfeature tables first.
    pub fn to_sql(
        &self,
        graph: &JoinGraph,
        schemas: &[FrameSchema],
        categories: &Encoding,
    ) -> Result<Vec<String>> {
        if !self.fitted {
            return Err(Error::NotFitted(
                "this Relboost learner has not been fit".to_string(),
            ));
        }
        let mut out = Vec::new();
        for sub in &self.subensembles {
            emit_sub_ensemble(sub, graph, schemas, categories, &mut out)?;
        }
        for (ix, tree) in self.trees.iter().enumerate() {
            let table = format!("FEATURE_{}", ix + 1);
            out.push(tree_to_sql(tree, &table, 0, graph, schemas, categories)?);
        }
        Ok(out)
    }
}

fn emit_sub_ensemble(
    sub: &SubEnsemble,
    graph: &JoinGraph,
    schemas: &[FrameSchema],
    categories: &Encoding,
    out: &mut Vec<String>,
) -> Result<()> {
    for child in &sub.children {
        emit_sub_ensemble(child, graph, schemas, categories, out)?;
    }
    for (ix, tree) in sub.trees.iter().enumerate() {
        let table = format!("SUBFEATURE_{}_{}_{}", sub.node, sub.agg.as_str(), ix + 1);
        out.push(tree_to_sql(tree, &table, sub.node, graph, schemas, categories)?);
    }
    Ok(())
}

fn tree_to_sql(
    tree: &Tree,
    table: &str,
    parent: usize,
    graph: &JoinGraph,
    schemas: &[FrameSchema],
    categories: &Encoding,
) -> Result<String> {
    let edge = graph
        .joins_of(parent)
        .find(|e| e.child == tree.peripheral_node)
        .ok_or_else(|| {
            Error::Internal(format!(
                "no declared join between graph nodes {parent} and {}",
                tree.peripheral_node
            ))
        })?;
    let path = JoinPath::from_edge(
        &schemas[parent].name,
        &schemas[tree.peripheral_node].name,
        edge,
    );

    let ctx = SqlContext {
        output: &schemas[parent],
        input: &schemas[tree.peripheral_node],
        input_node: tree.peripheral_node,
        time_stamps: edge.time_stamps.clone(),
        categories,
    };
    let expr = node_expr(tree, tree.root()?, &ctx)?;

    let column = table.to_lowercase();
    Ok(format!(
        "CREATE TABLE {table_q} AS\nSELECT COALESCE( {agg}( {expr} ), 0.0 ) * {rate} AS \"{column}\",\n       t1.rowid AS rownum\n{join}\nGROUP BY t1.rowid;",
        table_q = quote_table(table),
        agg = tree.agg.as_str(),
        rate = float_literal(tree.update_rate),
        join = path.render(edge.time_stamps.is_some()),
    ))
}

struct SqlContext<'a> {
    output: &'a FrameSchema,
    input: &'a FrameSchema,
    input_node: usize,
    time_stamps: Option<(String, String)>,
    categories: &'a Encoding,
}

fn node_expr(tree: &Tree, node: &TreeNode, ctx: &SqlContext<'_>) -> Result<String> {
    match &node.split {
        None => Ok(float_literal(node.weight)),
        Some(split) => {
            let condition = condition_sql(split, ctx)?;
            let left = node_expr(tree, &tree.nodes()[node.left], ctx)?;
            let right = node_expr(tree, &tree.nodes()[node.right], ctx)?;
            Ok(format!(
                "CASE WHEN {condition} THEN {left} ELSE {right} END"
            ))
        }
    }
}

fn condition_sql(split: &Split, ctx: &SqlContext<'_>) -> Result<String> {
    let name = |schema: &FrameSchema, role: Role, ix: usize, alias: &str| -> Result<String> {
        schema
            .names_with_role(role)
            .get(ix)
            .map(|n| quote(alias, n))
            .ok_or_else(|| {
                Error::Internal(format!(
                    "no {role} column {ix} in frame '{}'",
                    schema.name
                ))
            })
    };

    let operand = match &split.column {
        SplitColumn::InputNumerical(j) => name(ctx.input, Role::Numerical, *j, "t2")?,
        SplitColumn::InputDiscrete(j) => name(ctx.input, Role::Discrete, *j, "t2")?,
        SplitColumn::InputCategorical(j) => name(ctx.input, Role::Categorical, *j, "t2")?,
        SplitColumn::OutputNumerical(j) => name(ctx.output, Role::Numerical, *j, "t1")?,
        SplitColumn::OutputDiscrete(j) => name(ctx.output, Role::Discrete, *j, "t1")?,
        SplitColumn::OutputCategorical(j) => name(ctx.output, Role::Categorical, *j, "t1")?,
        SplitColumn::SameUnitsNumerical { input, output } => format!(
            "{} - {}",
            name(ctx.output, Role::Numerical, *output, "t1")?,
            name(ctx.input, Role::Numerical, *input, "t2")?
        ),
        SplitColumn::SameUnitsDiscrete { input, output } => format!(
            "{} - {}",
            name(ctx.output, Role::Discrete, *output, "t1")?,
            name(ctx.input, Role::Discrete, *input, "t2")?
        ),
        SplitColumn::TimeDiff => {
            let (pop_ts, per_ts) = ctx.time_stamps.as_ref().ok_or_else(|| {
                Error::Internal("time-diff split on a join without time stamps".to_string())
            })?;
            format!("{} - {}", quote("t1", pop_ts), quote("t2", per_ts))
        }
        SplitColumn::Subfeature(j) => {
            // Produced by the matching SUBFEATURE_* table emitted above.
            quote("t2", &format!("subfeature_{}_{}", ctx.input_node, j + 1))
        }
    };

    if split.is_nan_branch {
        return Ok(format!("{operand} IS NULL"));
    }

    match &split.column {
        SplitColumn::InputCategorical(_) | SplitColumn::OutputCategorical(_) => {
            let values: Vec<String> = split
                .categories_used
                .iter()
                .map(|&code| string_literal(ctx.categories.get_or_null(code)))
                .collect();
            Ok(format!("{operand} IN ( {} )", values.join(", ")))
        }
        _ => Ok(format!(
            "{operand} <= {}",
            float_literal(split.critical_value)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::column::{Column, Role};
    use crate::containers::frame::DataFrame;
    use crate::containers::join_graph::PlaceholderSpec;
    use crate::relboost::{RelboostHyperparams, RelboostModel};

    #[test]
    fn test_ensemble_to_sql() {
        let spec: PlaceholderSpec = serde_json::from_value(serde_json::json!({
            "name": "POPULATION",
            "joins": [{"table": "PERIPHERAL", "keys": [["jk", "jk"]]}]
        }))
        .unwrap();
        let graph = JoinGraph::from_spec(&spec).unwrap();

        let mut pop = DataFrame::new("POPULATION");
        pop.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 2, 3, 4]))
            .unwrap();
        pop.add_float_column(Role::Target, Column::new("y", vec![1.0, 1.0, 5.0, 5.0]))
            .unwrap();
        let mut per = DataFrame::new("PERIPHERAL");
        per.add_int_column(Role::JoinKey, Column::new("jk", vec![1, 2, 3, 4]))
            .unwrap();
        per.add_float_column(Role::Numerical, Column::new("x", vec![0.0, 1.0, 2.0, 3.0]))
            .unwrap();

        let mut model = RelboostModel::new(RelboostHyperparams {
            num_features: 2,
            max_depth: 2,
            min_num_samples: 1,
            use_timestamps: false,
            ..RelboostHyperparams::default()
        });
        let frames = vec![pop.clone(), per.clone()];
        model.fit(&frames, &graph).unwrap();

        let schemas = vec![
            crate::containers::schema::FrameSchema::of(&pop),
            crate::containers::schema::FrameSchema::of(&per),
        ];
        let statements = model.to_sql(&graph, &schemas, &Encoding::new()).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE \"FEATURE_1\" AS"));
        assert!(statements[0].contains("GROUP BY t1.rowid;"));
        assert!(statements[0].contains("LEFT JOIN \"PERIPHERAL\" t2"));
    }
}
