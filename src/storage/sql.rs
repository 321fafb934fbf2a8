//! Parameterized statement builders.
//!
//! Statements render to `(sql, params)` with `$1..$n` placeholders, in a
//! deliberately small dialect: equality/range/`IN` filters, `ORDER BY`,
//! and relative assignments (`col = col + $n`) for lost-update-free
//! counters. Entity code builds statements here; backends only ever see
//! the rendered form.

use crate::core::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

enum Filter {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
}

#[derive(Default)]
struct Filters(Vec<Filter>);

impl Filters {
    fn render(&self, sql: &mut String, params: &mut Vec<Value>) {
        if self.0.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        for (i, filter) in self.0.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            match filter {
                Filter::Eq(col, v) => {
                    params.push(v.clone());
                    sql.push_str(&format!("{} = ${}", col, params.len()));
                }
                Filter::Lt(col, v) => {
                    params.push(v.clone());
                    sql.push_str(&format!("{} < ${}", col, params.len()));
                }
                Filter::Gt(col, v) => {
                    params.push(v.clone());
                    sql.push_str(&format!("{} > ${}", col, params.len()));
                }
                Filter::In(col, values) | Filter::NotIn(col, values) => {
                    debug_assert!(!values.is_empty(), "IN filter with no values");
                    let negated = matches!(filter, Filter::NotIn(..));
                    sql.push_str(col);
                    sql.push_str(if negated { " NOT IN (" } else { " IN (" });
                    for (j, v) in values.iter().enumerate() {
                        if j > 0 {
                            sql.push_str(", ");
                        }
                        params.push(v.clone());
                        sql.push_str(&format!("${}", params.len()));
                    }
                    sql.push(')');
                }
                Filter::IsNull(col) => sql.push_str(&format!("{} IS NULL", col)),
                Filter::IsNotNull(col) => sql.push_str(&format!("{} IS NOT NULL", col)),
            }
        }
    }
}

/// SELECT over one table. Always selects `*`; entity hydration picks
/// the columns it knows about.
pub struct Select {
    table: String,
    filters: Filters,
    order: Vec<(String, Order)>,
    random_order: bool,
}

impl Select {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Filters::default(),
            order: Vec::new(),
            random_order: false,
        }
    }

    pub fn filter_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.0.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn filter_lt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.0.push(Filter::Lt(column.to_string(), value.into()));
        self
    }

    pub fn filter_gt(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.0.push(Filter::Gt(column.to_string(), value.into()));
        self
    }

    pub fn filter_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.filters.0.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn filter_not_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.filters.0.push(Filter::NotIn(column.to_string(), values));
        self
    }

    pub fn filter_is_null(mut self, column: &str) -> Self {
        self.filters.0.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn filter_is_not_null(mut self, column: &str) -> Self {
        self.filters.0.push(Filter::IsNotNull(column.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, order: Order) -> Self {
        self.order.push((column.to_string(), order));
        self
    }

    /// Random permutation; replaces any column ordering.
    pub fn order_random(mut self) -> Self {
        self.random_order = true;
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("SELECT * FROM {}", self.table);
        let mut params = Vec::new();
        self.filters.render(&mut sql, &mut params);
        if self.random_order {
            sql.push_str(" ORDER BY RANDOM()");
        } else if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, (column, order)) in self.order.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(column);
                sql.push_str(match order {
                    Order::Asc => " ASC",
                    Order::Desc => " DESC",
                });
            }
        }
        (sql, params)
    }
}

/// INSERT of explicit column values.
pub struct Insert {
    table: String,
    values: Vec<(String, Value)>,
}

impl Insert {
    pub fn into(table: &str) -> Self {
        Self {
            table: table.to_string(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.push((column.to_string(), value.into()));
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        debug_assert!(!self.values.is_empty(), "INSERT with no values");
        let columns: Vec<&str> = self.values.iter().map(|(c, _)| c.as_str()).collect();
        let placeholders: Vec<String> =
            (1..=self.values.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );
        let params = self.values.iter().map(|(_, v)| v.clone()).collect();
        (sql, params)
    }
}

enum Assign {
    Set(String, Value),
    /// `col = col + $n`; the delta may be negative. Evaluated storage
    /// side so concurrent adjustments never lose updates.
    Add(String, i64),
}

/// UPDATE of explicit assignments, filtered like a SELECT.
pub struct Update {
    table: String,
    assigns: Vec<Assign>,
    filters: Filters,
}

impl Update {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            assigns: Vec::new(),
            filters: Filters::default(),
        }
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.assigns.push(Assign::Set(column.to_string(), value.into()));
        self
    }

    pub fn set_add(mut self, column: &str, delta: i64) -> Self {
        self.assigns.push(Assign::Add(column.to_string(), delta));
        self
    }

    pub fn filter_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.0.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        debug_assert!(!self.assigns.is_empty(), "UPDATE with no assignments");
        let mut sql = format!("UPDATE {} SET ", self.table);
        let mut params = Vec::new();
        for (i, assign) in self.assigns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            match assign {
                Assign::Set(col, v) => {
                    params.push(v.clone());
                    sql.push_str(&format!("{} = ${}", col, params.len()));
                }
                Assign::Add(col, delta) => {
                    params.push(Value::Integer(*delta));
                    sql.push_str(&format!("{} = {} + ${}", col, col, params.len()));
                }
            }
        }
        self.filters.render(&mut sql, &mut params);
        (sql, params)
    }
}

/// DELETE, filtered like a SELECT.
pub struct Delete {
    table: String,
    filters: Filters,
}

impl Delete {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Filters::default(),
        }
    }

    pub fn filter_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.0.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut params = Vec::new();
        self.filters.render(&mut sql, &mut params);
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_rendering() {
        let (sql, params) = Select::table("posts")
            .filter_eq("author_id", 7i64)
            .filter_in("topic_id", vec![Value::Integer(1), Value::Integer(2)])
            .order_by("published_at", Order::Desc)
            .order_by("id", Order::Asc)
            .build();

        assert_eq!(
            sql,
            "SELECT * FROM posts WHERE author_id = $1 AND topic_id IN ($2, $3) \
             ORDER BY published_at DESC, id ASC"
        );
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_insert_rendering() {
        let (sql, params) = Insert::into("users")
            .value("id", 1i64)
            .value("username", "alice")
            .build();
        assert_eq!(sql, "INSERT INTO users (id, username) VALUES ($1, $2)");
        assert_eq!(params, vec![Value::Integer(1), Value::from("alice")]);
    }

    #[test]
    fn test_update_with_relative_assignment() {
        let (sql, params) = Update::table("users")
            .set("nickname", "Bob")
            .set_add("likes_count", -1)
            .filter_eq("id", 9i64)
            .build();
        assert_eq!(
            sql,
            "UPDATE users SET nickname = $1, likes_count = likes_count + $2 WHERE id = $3"
        );
        assert_eq!(params[1], Value::Integer(-1));
    }

    #[test]
    fn test_delete_rendering() {
        let (sql, _) = Delete::from("likes")
            .filter_eq("user_id", 1i64)
            .filter_eq("post_id", 2i64)
            .build();
        assert_eq!(sql, "DELETE FROM likes WHERE user_id = $1 AND post_id = $2");
    }

    #[test]
    fn test_random_order_replaces_columns() {
        let (sql, _) = Select::table("posts")
            .order_by("id", Order::Desc)
            .order_random()
            .build();
        assert_eq!(sql, "SELECT * FROM posts ORDER BY RANDOM()");
    }
}
