//! Building blocks for filtered, ordered and paginated SQL.
//!
//! Filters and changesets write straight into a `sqlx::QueryBuilder`, binding
//! owned values so the builder never borrows from the caller's input.

use crate::model::ListUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{Encode, QueryBuilder, Sqlite, Type};

pub type Builder<'a> = QueryBuilder<'a, Sqlite>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// A sortable/groupable column of one table.
pub trait Column: Copy + Send + Sync + 'static {
    fn column(&self) -> &'static str;

    /// Expression used as the `group_by` key.
    fn group_expr(&self) -> &'static str {
        self.column()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy<C> {
    pub field: C,
    pub direction: SortOrder,
}

impl<C> OrderBy<C> {
    pub fn asc(field: C) -> Self {
        OrderBy {
            field,
            direction: SortOrder::Asc,
        }
    }

    pub fn desc(field: C) -> Self {
        OrderBy {
            field,
            direction: SortOrder::Desc,
        }
    }
}

/// Appends `AND`-joined predicates, emitting `WHERE` before the first one.
pub struct Where<'q, 'a> {
    qb: &'q mut Builder<'a>,
    empty: bool,
}

impl<'q, 'a> Where<'q, 'a> {
    pub fn new(qb: &'q mut Builder<'a>) -> Self {
        Where { qb, empty: true }
    }

    /// Start a new predicate and hand back the builder to write it.
    pub fn and(&mut self) -> &mut Builder<'a> {
        self.qb.push(if self.empty { " WHERE " } else { " AND " });
        self.empty = false;
        &mut *self.qb
    }

    pub fn eq<T>(&mut self, column: &str, value: T)
    where
        T: 'a + Encode<'a, Sqlite> + Send + Type<Sqlite>,
    {
        self.and().push(column).push(" = ").push_bind(value);
    }

    pub fn eq_opt<T>(&mut self, column: &str, value: &Option<T>)
    where
        T: 'a + Encode<'a, Sqlite> + Send + Type<Sqlite> + Clone,
    {
        if let Some(v) = value {
            self.eq(column, v.clone());
        }
    }

    pub fn is_null(&mut self, column: &str, null: bool) {
        let sql = if null { " IS NULL" } else { " IS NOT NULL" };
        self.and().push(column).push(sql);
    }

    /// Case-insensitive substring match.
    pub fn contains(&mut self, column: &str, needle: &str) {
        self.and()
            .push(column)
            .push(" LIKE ")
            .push_bind(format!("%{}%", escape_like(needle)))
            .push(" ESCAPE '\\'");
    }

    /// The JSON string-list column holds `item`.
    pub fn has(&mut self, column: &str, item: &str) {
        self.and()
            .push("EXISTS (SELECT 1 FROM json_each(")
            .push(column)
            .push(") WHERE json_each.value = ")
            .push_bind(item.to_string())
            .push(")");
    }

    pub fn cmp(&mut self, column: &str, op: &str, value: DateTime<Utc>) {
        self.and().push(column).push(" ").push(op).push(" ").push_bind(value);
    }

    /// Raw predicate with no bound values.
    pub fn raw(&mut self, sql: &str) {
        self.and().push(sql);
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Per-entity `where` input.
pub trait Filter: Send + Sync {
    fn apply(&self, w: &mut Where<'_, '_>);
}

/// Appends `col = value` pairs to an `UPDATE ... SET` list.
pub struct Assignments<'q, 'a> {
    qb: &'q mut Builder<'a>,
    count: usize,
}

impl<'q, 'a> Assignments<'q, 'a> {
    pub fn new(qb: &'q mut Builder<'a>) -> Self {
        Assignments { qb, count: 0 }
    }

    fn next(&mut self) -> &mut Builder<'a> {
        if self.count > 0 {
            self.qb.push(", ");
        }
        self.count += 1;
        &mut *self.qb
    }

    pub fn set<T>(&mut self, column: &str, value: T)
    where
        T: 'a + Encode<'a, Sqlite> + Send + Type<Sqlite>,
    {
        self.next().push(column).push(" = ").push_bind(value);
    }

    /// Assign when the change is present.
    pub fn set_opt<T>(&mut self, column: &str, value: &Option<T>)
    where
        T: 'a + Encode<'a, Sqlite> + Send + Type<Sqlite> + Clone,
    {
        if let Some(v) = value {
            self.set(column, v.clone());
        }
    }

    /// `Set` replaces the JSON array; `Push` appends each item in order with
    /// nested `json_insert(.., '$[#]', ..)`.
    pub fn list(&mut self, column: &str, update: &Option<ListUpdate>) {
        match update {
            None => {}
            Some(ListUpdate::Set(items)) => self.set(column, Json(items.clone())),
            Some(ListUpdate::Push(items)) if items.is_empty() => {}
            Some(ListUpdate::Push(items)) => {
                let qb = self.next();
                qb.push(column).push(" = ");
                for _ in items {
                    qb.push("json_insert(");
                }
                qb.push(column);
                for item in items {
                    qb.push(", '$[#]', ").push_bind(item.clone()).push(")");
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Per-entity partial update.
pub trait Changeset: Send + Sync {
    /// Validate and normalize before any SQL runs.
    fn prepare(&mut self) -> crate::error::Result<()>;
    fn apply(&self, set: &mut Assignments<'_, '_>);
}

/// `findMany` arguments.
#[derive(Debug, Clone)]
pub struct FindMany<F, C> {
    pub filter: F,
    pub order_by: Vec<OrderBy<C>>,
    /// Id of the first row of the page (inclusive).
    pub cursor: Option<String>,
    pub skip: Option<u32>,
    pub take: Option<u32>,
}

impl<F: Default, C> Default for FindMany<F, C> {
    fn default() -> Self {
        FindMany {
            filter: F::default(),
            order_by: Vec::new(),
            cursor: None,
            skip: None,
            take: None,
        }
    }
}

impl<F: Default, C> FindMany<F, C> {
    pub fn new(filter: F) -> Self {
        FindMany {
            filter,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, order: OrderBy<C>) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn cursor(mut self, id: impl Into<String>) -> Self {
        self.cursor = Some(id.into());
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u32) -> Self {
        self.take = Some(n);
        self
    }
}

impl<F: Filter, C: Column> FindMany<F, C> {
    /// Append `WHERE`, `ORDER BY` and `LIMIT/OFFSET` for `table`.
    pub fn push_sql(&self, table: &'static str, qb: &mut Builder<'_>) {
        {
            let mut w = Where::new(qb);
            self.filter.apply(&mut w);
            if let Some(cursor) = &self.cursor {
                push_cursor(&mut w, table, &self.order_by, cursor);
            }
        }

        if !self.order_by.is_empty() || self.cursor.is_some() {
            push_order_by(qb, &self.order_by);
        }

        match (self.take, self.skip) {
            (Some(take), skip) => {
                qb.push(" LIMIT ")
                    .push_bind(i64::from(take))
                    .push(" OFFSET ")
                    .push_bind(i64::from(skip.unwrap_or(0)));
            }
            (None, Some(skip)) => {
                qb.push(" LIMIT -1 OFFSET ").push_bind(i64::from(skip));
            }
            (None, None) => {}
        }
    }
}

/// `ORDER BY` the given keys, then `id ASC` unless `id` is already one of them.
pub fn push_order_by<C: Column>(qb: &mut Builder<'_>, order_by: &[OrderBy<C>]) {
    qb.push(" ORDER BY ");
    for (i, o) in order_by.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(o.field.column()).push(" ").push(o.direction.keyword());
    }
    if !order_by.iter().any(|o| o.field.column() == "id") {
        if !order_by.is_empty() {
            qb.push(", ");
        }
        qb.push("id ASC");
    }
}

/// Rows at or after the cursor row in the requested ordering, expanded as
/// `after(k1) OR (k1 IS c1 AND after(k2)) OR ... OR (.. AND id >= cursor)`.
/// Each `c` is read back from the cursor row. NULL sorts first ascending and
/// last descending, so `after` treats it as the smallest value. An unknown
/// cursor matches nothing.
fn push_cursor<C: Column>(
    w: &mut Where<'_, '_>,
    table: &'static str,
    order_by: &[OrderBy<C>],
    cursor: &str,
) {
    let mut keys: Vec<(&'static str, SortOrder)> = order_by
        .iter()
        .map(|o| (o.field.column(), o.direction))
        .collect();
    if !keys.iter().any(|(c, _)| *c == "id") {
        keys.push(("id", SortOrder::Asc));
    }

    w.and()
        .push("EXISTS (SELECT 1 FROM ")
        .push(table)
        .push(" WHERE id = ")
        .push_bind(cursor.to_string())
        .push(")");

    let qb = w.and();
    qb.push("(");
    for i in 0..keys.len() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for (col, _) in &keys[..i] {
            qb.push(*col).push(" IS ");
            push_cursor_value(qb, table, col, cursor);
            qb.push(" AND ");
        }
        let (col, dir) = keys[i];
        qb.push("(");
        push_after(qb, table, col, dir, cursor);
        if i + 1 == keys.len() {
            qb.push(" OR ").push(col).push(" IS ");
            push_cursor_value(qb, table, col, cursor);
        }
        qb.push("))");
    }
    qb.push(")");
}

/// `col` sorts strictly after the cursor row's value in direction `dir`.
fn push_after(
    qb: &mut Builder<'_>,
    table: &'static str,
    col: &str,
    dir: SortOrder,
    cursor: &str,
) {
    qb.push("(");
    let op = match dir {
        SortOrder::Asc => {
            push_cursor_value(qb, table, col, cursor);
            qb.push(" IS NULL AND ").push(col).push(" IS NOT NULL");
            " > "
        }
        SortOrder::Desc => {
            qb.push(col).push(" IS NULL AND ");
            push_cursor_value(qb, table, col, cursor);
            qb.push(" IS NOT NULL");
            " < "
        }
    };
    qb.push(") OR ").push(col).push(op);
    push_cursor_value(qb, table, col, cursor);
}

fn push_cursor_value(qb: &mut Builder<'_>, table: &'static str, col: &str, cursor: &str) {
    qb.push("(SELECT ")
        .push(col)
        .push(" FROM ")
        .push(table)
        .push(" WHERE id = ")
        .push_bind(cursor.to_string())
        .push(")");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum TestField {
        Name,
        Id,
    }

    impl Column for TestField {
        fn column(&self) -> &'static str {
            match self {
                TestField::Name => "name",
                TestField::Id => "id",
            }
        }
    }

    #[derive(Default)]
    struct TestFilter {
        name: Option<String>,
        tag: Option<String>,
    }

    impl Filter for TestFilter {
        fn apply(&self, w: &mut Where<'_, '_>) {
            w.eq_opt("name", &self.name);
            if let Some(tag) = &self.tag {
                w.has("tags", tag);
            }
        }
    }

    fn render(q: &FindMany<TestFilter, TestField>) -> String {
        let mut qb = Builder::new("SELECT * FROM t");
        q.push_sql("t", &mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn no_filter_no_order() {
        let q: FindMany<TestFilter, TestField> = FindMany::default();
        assert_eq!(render(&q), "SELECT * FROM t");
    }

    #[test]
    fn filters_join_with_and() {
        let q: FindMany<TestFilter, TestField> = FindMany::new(TestFilter {
            name: Some("a".into()),
            tag: Some("x".into()),
        });
        assert_eq!(
            render(&q),
            "SELECT * FROM t WHERE name = ? AND EXISTS (SELECT 1 FROM json_each(tags) WHERE json_each.value = ?)"
        );
    }

    #[test]
    fn order_gets_id_tie_breaker() {
        let q: FindMany<TestFilter, TestField> = FindMany::default()
            .order_by(OrderBy::desc(TestField::Name))
            .take(10)
            .skip(5);
        assert_eq!(
            render(&q),
            "SELECT * FROM t ORDER BY name DESC, id ASC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn explicit_id_order_is_not_duplicated() {
        let q: FindMany<TestFilter, TestField> =
            FindMany::default().order_by(OrderBy::desc(TestField::Id));
        assert_eq!(render(&q), "SELECT * FROM t ORDER BY id DESC");
    }

    #[test]
    fn skip_without_take() {
        let q: FindMany<TestFilter, TestField> = FindMany::default().skip(3);
        assert_eq!(render(&q), "SELECT * FROM t LIMIT -1 OFFSET ?");
    }

    #[test]
    fn cursor_expands_keyset() {
        let q: FindMany<TestFilter, TestField> = FindMany::default()
            .order_by(OrderBy::asc(TestField::Name))
            .cursor("c1");
        let sql = render(&q);
        let v = |c: &str| format!("(SELECT {c} FROM t WHERE id = ?)");
        let expected = format!(
            "SELECT * FROM t WHERE EXISTS (SELECT 1 FROM t WHERE id = ?) AND (\
             ((({n} IS NULL AND name IS NOT NULL) OR name > {n})) OR \
             (name IS {n} AND (({i} IS NULL AND id IS NOT NULL) OR id > {i} OR id IS {i})))",
            n = v("name"),
            i = v("id"),
        );
        assert!(sql.starts_with(&expected), "{sql}");
        assert!(sql.ends_with("ORDER BY name ASC, id ASC"));
    }

    #[test]
    fn descending_cursor_puts_nulls_last() {
        let q: FindMany<TestFilter, TestField> = FindMany::default()
            .order_by(OrderBy::desc(TestField::Name))
            .cursor("c1");
        let sql = render(&q);
        let n = "(SELECT name FROM t WHERE id = ?)";
        assert!(sql.contains(&format!("((name IS NULL AND {n} IS NOT NULL) OR name < {n})")));
    }

    #[test]
    fn order_by_helper_skips_tie_breaker_for_id() {
        let mut qb = Builder::new("SELECT * FROM t");
        push_order_by(&mut qb, &[OrderBy::desc(TestField::Id)]);
        assert_eq!(qb.sql(), "SELECT * FROM t ORDER BY id DESC");

        let mut qb = Builder::new("SELECT * FROM t");
        push_order_by(&mut qb, &[OrderBy::asc(TestField::Name)]);
        assert_eq!(qb.sql(), "SELECT * FROM t ORDER BY name ASC, id ASC");
    }

    #[test]
    fn like_is_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn push_nests_json_insert() {
        let mut qb = Builder::new("UPDATE t SET ");
        let mut set = Assignments::new(&mut qb);
        set.list("tags", &Some(ListUpdate::Push(vec!["a".into(), "b".into()])));
        set.set("updated_at", 1_i64);
        assert_eq!(set.len(), 2);
        assert_eq!(
            qb.sql(),
            "UPDATE t SET tags = json_insert(json_insert(tags, '$[#]', ?), '$[#]', ?), updated_at = ?"
        );
    }
}
