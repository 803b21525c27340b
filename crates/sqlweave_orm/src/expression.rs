use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use sqlweave_core::{PagerModel, PlaceholderStyle, SqlDialect, Value};

use crate::error::OrmError;
use crate::schema::{is_identifier, Key};

/// Options for rendering an expression tree to SQL.
///
/// The same tree renders either with inlined literals or with placeholders
/// plus a captured parameter vector, deterministically.
#[derive(Default, Clone, Copy)]
pub struct SqlGenOptions<'a> {
    /// Dialect for literal spelling and pagination; generic literals when
    /// absent.
    pub dialect: Option<&'a dyn SqlDialect>,
    /// Replace constants with placeholders and collect them into the
    /// context.
    pub collect_params: bool,
    pub placeholder_style: PlaceholderStyle,
    /// Overrides the dialect's pagination form when set.
    pub pager_model: Option<PagerModel>,
}

impl<'a> SqlGenOptions<'a> {
    /// Inline literals, no dialect.
    pub fn inline() -> SqlGenOptions<'static> {
        SqlGenOptions::default()
    }

    pub fn with_dialect(dialect: &'a dyn SqlDialect) -> SqlGenOptions<'a> {
        SqlGenOptions {
            dialect: Some(dialect),
            ..SqlGenOptions::default()
        }
    }

    pub fn collecting(mut self, style: PlaceholderStyle) -> SqlGenOptions<'a> {
        self.collect_params = true;
        self.placeholder_style = style;
        self
    }
}

/// Accumulates captured parameters and the placeholder counter during one
/// rendering pass.
#[derive(Debug, Default)]
pub struct SqlGenContext {
    pub params: Vec<Value>,
    pub counter: usize,
}

impl SqlGenContext {
    pub fn new() -> SqlGenContext {
        SqlGenContext::default()
    }

    fn placeholder(&mut self, style: PlaceholderStyle) -> String {
        self.counter += 1;
        match style {
            PlaceholderStyle::Positional => "?".to_string(),
            PlaceholderStyle::Numbered | PlaceholderStyle::Named => format!(":{}", self.counter),
        }
    }
}

#[derive(Debug)]
enum ExprNode {
    Sql(String),
    Const(Value),
    Column {
        expr: Option<Expression>,
        table: String,
        column: String,
        alias: String,
    },
    Unary {
        prefix: bool,
        op: String,
        expr: Expression,
    },
    Binary {
        lhs: Expression,
        op: String,
        rhs: Expression,
    },
    Join {
        lhs: Expression,
        rhs: Expression,
        cond: Expression,
    },
    List(Vec<Expression>),
    Select(SelectData),
    KeyFilter(Key),
}

#[derive(Debug)]
struct SelectData {
    select: Expression,
    from: Expression,
    where_: Expression,
    group_by: Expression,
    having: Expression,
    order_by: Expression,
    distinct: bool,
    lock_mode: Option<String>,
    pager: Option<(u64, u64)>,
}

/// A node in the SQL AST. Cheap to clone; subtrees are shared.
#[derive(Debug, Clone)]
pub struct Expression {
    node: Arc<ExprNode>,
}

impl Expression {
    fn wrap(node: ExprNode) -> Expression {
        Expression {
            node: Arc::new(node),
        }
    }

    pub fn empty() -> Expression {
        Expression::sql("")
    }

    /// A raw SQL atom: a column name, a table name, or vendor SQL the
    /// algebra does not model.
    pub fn sql(sql: impl Into<String>) -> Expression {
        Expression::wrap(ExprNode::Sql(sql.into()))
    }

    pub fn value(value: impl Into<Value>) -> Expression {
        ConstExpr::new(value).into_expr()
    }

    pub fn is_empty(&self) -> bool {
        matches!(&*self.node, ExprNode::Sql(s) if s.is_empty())
    }

    /// Render with inline generic literals.
    pub fn get_sql(&self) -> Result<String, OrmError> {
        self.generate_sql(&SqlGenOptions::inline(), &mut SqlGenContext::new())
    }

    /// Render to SQL, capturing parameters into `ctx` when the options ask
    /// for placeholders.
    pub fn generate_sql(
        &self,
        opts: &SqlGenOptions<'_>,
        ctx: &mut SqlGenContext,
    ) -> Result<String, OrmError> {
        render(&self.node, opts, ctx)
    }

    fn binary(self, op: &str, rhs: Expression) -> Expression {
        Expression::wrap(ExprNode::Binary {
            lhs: self,
            op: op.to_string(),
            rhs,
        })
    }

    pub fn eq(self, rhs: impl Into<Expression>) -> Expression {
        let rhs = rhs.into();
        if rhs.is_null_const() {
            return self.is_null();
        }
        self.binary("=", rhs)
    }

    pub fn ne(self, rhs: impl Into<Expression>) -> Expression {
        let rhs = rhs.into();
        if rhs.is_null_const() {
            return Expression::wrap(ExprNode::Unary {
                prefix: false,
                op: "IS NOT NULL".to_string(),
                expr: self,
            });
        }
        self.binary("<>", rhs)
    }

    pub fn gt(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(">", rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Expression>) -> Expression {
        self.binary("<", rhs.into())
    }

    pub fn ge(self, rhs: impl Into<Expression>) -> Expression {
        self.binary(">=", rhs.into())
    }

    pub fn le(self, rhs: impl Into<Expression>) -> Expression {
        self.binary("<=", rhs.into())
    }

    pub fn like_(self, rhs: impl Into<Expression>) -> Expression {
        self.binary("LIKE", rhs.into())
    }

    pub fn in_(self, items: impl Into<ExpressionList>) -> Expression {
        let list = items.into().into_expr();
        Expression::wrap(ExprNode::Binary {
            lhs: self,
            op: "IN".to_string(),
            rhs: Expression::wrap(ExprNode::Unary {
                prefix: true,
                op: String::new(),
                expr: list,
            }),
        })
    }

    pub fn between(self, lo: impl Into<Expression>, hi: impl Into<Expression>) -> Expression {
        let range = lo.into().binary("AND", hi.into());
        self.binary("BETWEEN", range)
    }

    pub fn is_null(self) -> Expression {
        Expression::wrap(ExprNode::Unary {
            prefix: false,
            op: "IS NULL".to_string(),
            expr: self,
        })
    }

    fn is_null_const(&self) -> bool {
        matches!(&*self.node, ExprNode::Const(Value::Null))
    }
}

impl From<Value> for Expression {
    fn from(v: Value) -> Expression {
        ConstExpr::new(v).into_expr()
    }
}

impl From<&str> for Expression {
    fn from(s: &str) -> Expression {
        Expression::sql(s)
    }
}

impl Not for Expression {
    type Output = Expression;

    fn not(self) -> Expression {
        Expression::wrap(ExprNode::Unary {
            prefix: true,
            op: "NOT".to_string(),
            expr: self,
        })
    }
}

impl BitAnd for Expression {
    type Output = Expression;

    fn bitand(self, rhs: Expression) -> Expression {
        if self.is_empty() {
            return rhs;
        }
        if rhs.is_empty() {
            return self;
        }
        self.binary("AND", rhs)
    }
}

impl BitOr for Expression {
    type Output = Expression;

    fn bitor(self, rhs: Expression) -> Expression {
        if self.is_empty() {
            return rhs;
        }
        if rhs.is_empty() {
            return self;
        }
        self.binary("OR", rhs)
    }
}

/// A constant; renders as the dialect literal or as a captured placeholder.
pub struct ConstExpr(Expression);

impl ConstExpr {
    pub fn new(value: impl Into<Value>) -> ConstExpr {
        ConstExpr(Expression::wrap(ExprNode::Const(value.into())))
    }

    pub fn into_expr(self) -> Expression {
        self.0
    }
}

/// A `table.column` reference, or an aliased subexpression.
pub struct ColumnExpr(Expression);

impl ColumnExpr {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Expression {
        Expression::wrap(ExprNode::Column {
            expr: None,
            table: table.into(),
            column: column.into(),
            alias: String::new(),
        })
    }

    pub fn with_alias(
        table: impl Into<String>,
        column: impl Into<String>,
        alias: impl Into<String>,
    ) -> Expression {
        Expression::wrap(ExprNode::Column {
            expr: None,
            table: table.into(),
            column: column.into(),
            alias: alias.into(),
        })
    }

    pub fn aliased(expr: Expression, alias: impl Into<String>) -> Expression {
        Expression::wrap(ExprNode::Column {
            expr: Some(expr),
            table: String::new(),
            column: String::new(),
            alias: alias.into(),
        })
    }
}

/// Comma-separated list of expressions.
pub struct ExpressionList(Vec<Expression>);

impl ExpressionList {
    pub fn new() -> ExpressionList {
        ExpressionList(Vec::new())
    }

    pub fn append(&mut self, expr: impl Into<Expression>) {
        self.0.push(expr.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_expr(self) -> Expression {
        Expression::wrap(ExprNode::List(self.0))
    }
}

impl Default for ExpressionList {
    fn default() -> Self {
        ExpressionList::new()
    }
}

impl<T: Into<Expression>> FromIterator<T> for ExpressionList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> ExpressionList {
        ExpressionList(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<Value>> for ExpressionList {
    fn from(values: Vec<Value>) -> ExpressionList {
        values.into_iter().map(Expression::from).collect()
    }
}

impl From<Vec<&str>> for ExpressionList {
    fn from(names: Vec<&str>) -> ExpressionList {
        names.into_iter().map(Expression::sql).collect()
    }
}

/// `lhs JOIN rhs ON (cond)`.
pub struct JoinExpr(Expression);

impl JoinExpr {
    pub fn new(lhs: Expression, rhs: Expression, cond: Expression) -> JoinExpr {
        JoinExpr(Expression::wrap(ExprNode::Join { lhs, rhs, cond }))
    }

    pub fn into_expr(self) -> Expression {
        self.0
    }
}

/// Conjunction of `table.column = value` over a key's components.
pub struct KeyFilter(Expression);

impl KeyFilter {
    pub fn new(key: Key) -> KeyFilter {
        KeyFilter(Expression::wrap(ExprNode::KeyFilter(key)))
    }

    pub fn into_expr(self) -> Expression {
        self.0
    }
}

pub fn filter_eq(name: impl Into<String>, value: impl Into<Value>) -> Expression {
    Expression::sql(name.into()).eq(ConstExpr::new(value).into_expr())
}

pub fn filter_ne(name: impl Into<String>, value: impl Into<Value>) -> Expression {
    Expression::sql(name.into()).ne(ConstExpr::new(value).into_expr())
}

pub fn filter_gt(name: impl Into<String>, value: impl Into<Value>) -> Expression {
    Expression::sql(name.into()).gt(ConstExpr::new(value).into_expr())
}

pub fn filter_lt(name: impl Into<String>, value: impl Into<Value>) -> Expression {
    Expression::sql(name.into()).lt(ConstExpr::new(value).into_expr())
}

/// A SELECT under construction.
pub struct SelectExpr {
    data: SelectData,
}

impl SelectExpr {
    pub fn new(select: impl Into<Expression>) -> SelectExpr {
        SelectExpr {
            data: SelectData {
                select: select.into(),
                from: Expression::empty(),
                where_: Expression::empty(),
                group_by: Expression::empty(),
                having: Expression::empty(),
                order_by: Expression::empty(),
                distinct: false,
                lock_mode: None,
                pager: None,
            },
        }
    }

    pub fn from_(mut self, from: impl Into<Expression>) -> SelectExpr {
        self.data.from = from.into();
        self
    }

    pub fn where_(mut self, where_: impl Into<Expression>) -> SelectExpr {
        self.data.where_ = where_.into();
        self
    }

    pub fn group_by_(mut self, group_by: impl Into<Expression>) -> SelectExpr {
        self.data.group_by = group_by.into();
        self
    }

    pub fn having_(mut self, having: impl Into<Expression>) -> SelectExpr {
        self.data.having = having.into();
        self
    }

    pub fn order_by_(mut self, order_by: impl Into<Expression>) -> SelectExpr {
        self.data.order_by = order_by.into();
        self
    }

    pub fn distinct(mut self, flag: bool) -> SelectExpr {
        self.data.distinct = flag;
        self
    }

    pub fn for_update(mut self, flag: bool) -> SelectExpr {
        self.data.lock_mode = if flag {
            Some("FOR UPDATE".to_string())
        } else {
            None
        };
        self
    }

    pub fn with_lock_mode(mut self, lock_mode: impl Into<String>) -> SelectExpr {
        self.data.lock_mode = Some(lock_mode.into());
        self
    }

    pub fn for_update_flag(&self) -> bool {
        self.data.lock_mode.is_some()
    }

    /// Limit/offset; negative values are rejected.
    pub fn pager(mut self, limit: i64, offset: i64) -> Result<SelectExpr, OrmError> {
        if limit < 0 || offset < 0 {
            return Err(OrmError::bad_sql(format!(
                "invalid pagination parameters: limit={}, offset={}",
                limit, offset
            )));
        }
        self.data.pager = Some((limit as u64, offset as u64));
        Ok(self)
    }

    pub fn into_expr(self) -> Expression {
        Expression::wrap(ExprNode::Select(self.data))
    }
}

// -- rendering ---------------------------------------------------------------

/// A single token needs no parentheses: numbers, object names, placeholders.
fn is_number_or_object_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_#$:.?@".contains(c))
}

fn is_string_constant(s: &str) -> bool {
    if s.len() < 2 || !s.starts_with('\'') || !s.ends_with('\'') {
        return false;
    }
    // The interior must not close the literal early.
    let inner = &s[1..s.len() - 1];
    let mut quotes = 0usize;
    for c in inner.chars() {
        if c == '\'' {
            quotes += 1;
        }
    }
    quotes % 2 == 0
}

fn is_in_parentheses(s: &str) -> bool {
    if !s.starts_with('(') || !s.ends_with(')') {
        return false;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
                if depth == 0 && i + 1 != s.len() {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn parenthesize_as_needed(s: &str) -> String {
    if s.is_empty() || is_number_or_object_name(s) || is_string_constant(s) || is_in_parentheses(s)
    {
        s.to_string()
    } else {
        format!("({})", s)
    }
}

fn render_const(
    value: &Value,
    opts: &SqlGenOptions<'_>,
    ctx: &mut SqlGenContext,
) -> String {
    if opts.collect_params {
        ctx.params.push(value.clone());
        ctx.placeholder(opts.placeholder_style)
    } else {
        match opts.dialect {
            Some(d) => d.sql_value(value),
            None => value.sql_str(),
        }
    }
}

fn render(
    node: &ExprNode,
    opts: &SqlGenOptions<'_>,
    ctx: &mut SqlGenContext,
) -> Result<String, OrmError> {
    match node {
        ExprNode::Sql(s) => Ok(s.clone()),
        ExprNode::Const(v) => Ok(render_const(v, opts, ctx)),
        ExprNode::Column {
            expr,
            table,
            column,
            alias,
        } => {
            let base = match expr {
                Some(e) => parenthesize_as_needed(&e.generate_sql(opts, ctx)?),
                None => {
                    if table.is_empty() {
                        column.clone()
                    } else {
                        format!("{}.{}", table, column)
                    }
                }
            };
            if alias.is_empty() {
                Ok(base)
            } else {
                Ok(format!("{} {}", base, alias))
            }
        }
        ExprNode::Unary { prefix, op, expr } => {
            let inner = parenthesize_as_needed(&expr.generate_sql(opts, ctx)?);
            if op.is_empty() {
                Ok(inner)
            } else if *prefix {
                Ok(format!("{} {}", op, inner))
            } else {
                Ok(format!("{} {}", inner, op))
            }
        }
        ExprNode::Binary { lhs, op, rhs } => {
            let l = parenthesize_as_needed(&lhs.generate_sql(opts, ctx)?);
            let r = rhs.generate_sql(opts, ctx)?;
            // BETWEEN keeps its bare `lo AND hi` right-hand side.
            let r = if op == "BETWEEN" {
                r
            } else {
                parenthesize_as_needed(&r)
            };
            Ok(format!("{} {} {}", l, op, r))
        }
        ExprNode::Join { lhs, rhs, cond } => {
            let l = lhs.generate_sql(opts, ctx)?;
            let r = rhs.generate_sql(opts, ctx)?;
            let c = cond.generate_sql(opts, ctx)?;
            Ok(format!("{} JOIN {} ON ({})", l, r, c))
        }
        ExprNode::List(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(item.generate_sql(opts, ctx)?);
            }
            Ok(parts.join(", "))
        }
        ExprNode::KeyFilter(key) => {
            let mut parts = Vec::with_capacity(key.fields.len());
            for (name, value) in &key.fields {
                parts.push(format!(
                    "{}.{} = {}",
                    key.table,
                    name,
                    render_const(value, opts, ctx)
                ));
            }
            Ok(parts.join(" AND "))
        }
        ExprNode::Select(data) => render_select(data, opts, ctx),
    }
}

fn render_select(
    data: &SelectData,
    opts: &SqlGenOptions<'_>,
    ctx: &mut SqlGenContext,
) -> Result<String, OrmError> {
    let pager_model = match (data.pager, opts.pager_model) {
        (None, _) => None,
        (Some(p), Some(model)) => Some((p, model)),
        (Some(p), None) => match opts.dialect {
            Some(d) => match d.pager_model() {
                Some(model) => Some((p, model)),
                None => {
                    return Err(OrmError::bad_sql(format!(
                        "dialect {} has no pagination form",
                        d.name()
                    )));
                }
            },
            None => Some((p, PagerModel::Postfix)),
        },
    };

    let mut sql = String::from("SELECT ");
    if let Some(((limit, offset), PagerModel::Interbase)) = pager_model {
        sql.push_str(&format!("FIRST {} SKIP {} ", limit, offset));
    }
    if data.distinct {
        sql.push_str("DISTINCT ");
    }
    sql.push_str(&data.select.generate_sql(opts, ctx)?);

    let from = data.from.generate_sql(opts, ctx)?;
    if !from.is_empty() {
        sql.push_str(" FROM ");
        sql.push_str(&from);
    }
    let where_ = data.where_.generate_sql(opts, ctx)?;
    if !where_.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_);
    }
    let group_by = data.group_by.generate_sql(opts, ctx)?;
    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by);
    }
    let having = data.having.generate_sql(opts, ctx)?;
    if !having.is_empty() {
        if group_by.is_empty() {
            return Err(OrmError::bad_sql(
                "trying to use HAVING without GROUP BY clause",
            ));
        }
        sql.push_str(" HAVING ");
        sql.push_str(&having);
    }
    let order_by = data.order_by.generate_sql(opts, ctx)?;
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by);
    }
    if let Some(lock) = &data.lock_mode {
        sql.push(' ');
        sql.push_str(lock);
    }

    match pager_model {
        None | Some((_, PagerModel::Interbase)) => Ok(sql),
        Some(((limit, offset), PagerModel::Postfix)) => {
            Ok(format!("{} LIMIT {} OFFSET {}", sql, limit, offset))
        }
        Some(((limit, offset), PagerModel::Mysql)) => {
            Ok(format!("{} LIMIT {}, {}", sql, offset, limit))
        }
        Some(((limit, offset), PagerModel::Oracle)) => Ok(format!(
            "SELECT * FROM (SELECT X_.*, ROWNUM RN_ FROM ({}) X_ WHERE ROWNUM <= {}) WHERE RN_ > {}",
            sql,
            offset + limit,
            offset
        )),
    }
}

/// Collect the table names an expression's FROM/JOIN structure mentions.
pub fn find_all_tables(expr: &Expression, tables: &mut Vec<String>) {
    match &*expr.node {
        ExprNode::Sql(s) if is_identifier(s) => tables.push(s.clone()),
        ExprNode::Join { lhs, rhs, .. } => {
            find_all_tables(lhs, tables);
            find_all_tables(rhs, tables);
        }
        ExprNode::List(items) => {
            for item in items {
                find_all_tables(item, tables);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlweave_core::sql_dialect;

    #[test]
    fn test_filter_rendering() {
        assert_eq!(filter_eq("ID", 1).get_sql().unwrap(), "ID = 1");
        let f = filter_eq("ID", 1) & filter_ne("A", "a");
        assert_eq!(f.get_sql().unwrap(), "(ID = 1) AND (A <> 'a')");
        let f = filter_eq("ID", 1) | filter_lt("A", "a");
        assert_eq!(f.get_sql().unwrap(), "(ID = 1) OR (A < 'a')");
    }

    #[test]
    fn test_empty_collapses_in_conjunction() {
        let f = Expression::empty() & filter_eq("A", 1);
        assert_eq!(f.get_sql().unwrap(), "A = 1");
        let f = filter_eq("A", 1) & Expression::empty();
        assert_eq!(f.get_sql().unwrap(), "A = 1");
    }

    #[test]
    fn test_parenthesization() {
        let f = (filter_eq("A", 1) | filter_eq("B", 2)).not();
        assert_eq!(f.get_sql().unwrap(), "NOT ((A = 1) OR (B = 2))");
        let g = filter_eq("A", 1) & (filter_eq("B", 2) | filter_eq("C", 3));
        assert_eq!(g.get_sql().unwrap(), "(A = 1) AND ((B = 2) OR (C = 3))");
    }

    #[test]
    fn test_null_comparison() {
        let f = Expression::sql("A").eq(Value::Null);
        assert_eq!(f.get_sql().unwrap(), "A IS NULL");
        let f = Expression::sql("A").ne(Value::Null);
        assert_eq!(f.get_sql().unwrap(), "A IS NOT NULL");
    }

    #[test]
    fn test_in_and_between() {
        let f = Expression::sql("A").in_(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(f.get_sql().unwrap(), "A IN (1, 2)");
        let f = Expression::sql("A").between(Value::Int(1), Value::Int(5));
        assert_eq!(f.get_sql().unwrap(), "A BETWEEN 1 AND 5");
    }

    #[test]
    fn test_like() {
        let f = Expression::sql("NAME").like_(Value::from("%ora%"));
        assert_eq!(f.get_sql().unwrap(), "NAME LIKE '%ora%'");
    }

    #[test]
    fn test_column_expr_and_alias() {
        let e = ColumnExpr::with_alias("T", "A", "A1");
        assert_eq!(e.get_sql().unwrap(), "T.A A1");
        let e = ColumnExpr::aliased(Expression::sql("COUNT(*)"), "CNT");
        assert_eq!(e.get_sql().unwrap(), "(COUNT(*)) CNT");
    }

    #[test]
    fn test_placeholder_collection_matches_inline() {
        let f = filter_eq("A", 1) & filter_eq("B", "x");
        let inline = f.get_sql().unwrap();
        assert_eq!(inline, "(A = 1) AND (B = 'x')");

        let mut ctx = SqlGenContext::new();
        let opts = SqlGenOptions::inline().collecting(PlaceholderStyle::Positional);
        let sql = f.generate_sql(&opts, &mut ctx).unwrap();
        assert_eq!(sql, "(A = ?) AND (B = ?)");
        assert_eq!(ctx.params, vec![Value::Int(1), Value::Str("x".to_string())]);

        // Re-inlining the captured parameters gives the inline rendering.
        let mut reinlined = sql.clone();
        for p in &ctx.params {
            reinlined = reinlined.replacen('?', &p.sql_str(), 1);
        }
        assert_eq!(reinlined, inline);
    }

    #[test]
    fn test_numbered_placeholders() {
        let f = filter_eq("A", 1) & filter_eq("B", 2);
        let mut ctx = SqlGenContext::new();
        let opts = SqlGenOptions::inline().collecting(PlaceholderStyle::Numbered);
        assert_eq!(
            f.generate_sql(&opts, &mut ctx).unwrap(),
            "(A = :1) AND (B = :2)"
        );
    }

    #[test]
    fn test_key_filter() {
        let key = Key::new(
            "T_ORDER",
            vec![
                ("CLIENT_ID".to_string(), Value::LongInt(2)),
                ("ID".to_string(), Value::LongInt(7)),
            ],
        );
        let f = KeyFilter::new(key).into_expr();
        assert_eq!(
            f.get_sql().unwrap(),
            "T_ORDER.CLIENT_ID = 2 AND T_ORDER.ID = 7"
        );
        let mut ctx = SqlGenContext::new();
        let opts = SqlGenOptions::inline().collecting(PlaceholderStyle::Positional);
        assert_eq!(
            f.generate_sql(&opts, &mut ctx).unwrap(),
            "T_ORDER.CLIENT_ID = ? AND T_ORDER.ID = ?"
        );
        assert_eq!(ctx.params.len(), 2);
    }

    #[test]
    fn test_select_basic() {
        let sel = SelectExpr::new(Expression::sql("*"))
            .from_(Expression::sql("T"))
            .where_(filter_eq("ID", 1))
            .order_by_(Expression::sql("ID"));
        assert_eq!(
            sel.into_expr().get_sql().unwrap(),
            "SELECT * FROM T WHERE ID = 1 ORDER BY ID"
        );
    }

    #[test]
    fn test_select_having_requires_group_by() {
        let sel = SelectExpr::new(Expression::sql("A, COUNT(*)"))
            .from_(Expression::sql("T"))
            .having_(Expression::sql("COUNT(*) > 2"));
        assert!(matches!(
            sel.into_expr().get_sql(),
            Err(OrmError::BadSqlOperation(_))
        ));

        let sel = SelectExpr::new(Expression::sql("A, COUNT(*)"))
            .from_(Expression::sql("T"))
            .group_by_(Expression::sql("A"))
            .having_(Expression::sql("COUNT(*) > 2"));
        assert_eq!(
            sel.into_expr().get_sql().unwrap(),
            "SELECT A, COUNT(*) FROM T GROUP BY A HAVING COUNT(*) > 2"
        );
    }

    #[test]
    fn test_pager_rejects_negative() {
        let sel = SelectExpr::new(Expression::sql("*")).from_(Expression::sql("T"));
        assert!(matches!(
            sel.pager(-1, 0),
            Err(OrmError::BadSqlOperation(_))
        ));
    }

    #[test]
    fn test_pager_forms() {
        let build = || {
            SelectExpr::new(Expression::sql("*"))
                .from_(Expression::sql("T"))
                .pager(10, 20)
                .unwrap()
                .into_expr()
        };
        let mut ctx = SqlGenContext::new();
        let pg = sql_dialect("POSTGRES").unwrap();
        let opts = SqlGenOptions::with_dialect(pg.as_ref());
        assert_eq!(
            build().generate_sql(&opts, &mut ctx).unwrap(),
            "SELECT * FROM T LIMIT 10 OFFSET 20"
        );

        let my = sql_dialect("MYSQL").unwrap();
        let opts = SqlGenOptions::with_dialect(my.as_ref());
        assert_eq!(
            build().generate_sql(&opts, &mut ctx).unwrap(),
            "SELECT * FROM T LIMIT 20, 10"
        );

        let ib = sql_dialect("INTERBASE").unwrap();
        let opts = SqlGenOptions::with_dialect(ib.as_ref());
        assert_eq!(
            build().generate_sql(&opts, &mut ctx).unwrap(),
            "SELECT FIRST 10 SKIP 20 * FROM T"
        );

        let ora = sql_dialect("ORACLE").unwrap();
        let opts = SqlGenOptions::with_dialect(ora.as_ref());
        assert_eq!(
            build().generate_sql(&opts, &mut ctx).unwrap(),
            "SELECT * FROM (SELECT X_.*, ROWNUM RN_ FROM (SELECT * FROM T) X_ \
             WHERE ROWNUM <= 30) WHERE RN_ > 20"
        );

        let ms = sql_dialect("MSSQL").unwrap();
        let opts = SqlGenOptions::with_dialect(ms.as_ref());
        assert!(build().generate_sql(&opts, &mut ctx).is_err());
    }

    #[test]
    fn test_dialect_literals_in_expression() {
        let ora = sql_dialect("ORACLE").unwrap();
        let dt = sqlweave_core::parse_date_time("2011-02-28 12:30:01").unwrap();
        let f = filter_eq("D", Value::DateTime(dt));
        let opts = SqlGenOptions::with_dialect(ora.as_ref());
        let mut ctx = SqlGenContext::new();
        assert_eq!(
            f.generate_sql(&opts, &mut ctx).unwrap(),
            "D = TIMESTAMP '2011-02-28 12:30:01'"
        );
    }

    #[test]
    fn test_find_all_tables() {
        let join = JoinExpr::new(
            Expression::sql("T_A"),
            Expression::sql("T_B"),
            filter_eq("T_A.ID", 1),
        )
        .into_expr();
        let mut tables = Vec::new();
        find_all_tables(&join, &mut tables);
        assert_eq!(tables, vec!["T_A".to_string(), "T_B".to_string()]);
    }
}
