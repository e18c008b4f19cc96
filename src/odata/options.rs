//! Parsing of `$`-prefixed system query options into [`QueryOptions`].

use super::{Field, Filter, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderKey {
    pub field: Field,
    pub direction: Direction,
}

/// A parsed query. An empty `select` means every property.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub select: Vec<Field>,
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderKey>,
    pub top: Option<usize>,
    pub skip: usize,
    pub count: bool,
}

impl QueryOptions {
    /// Build options from raw query-string pairs. Pairs without a `$` prefix are ignored.
    pub fn from_params<'a, I>(params: I, max_top: usize) -> Result<Self, QueryError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut options = Self::default();
        for (key, value) in params {
            match key {
                "$select" => options.select = parse_select(value)?,
                "$filter" => options.filter = Some(Filter::parse(value)?),
                "$orderby" => options.order_by = parse_order_by(value)?,
                "$top" => {
                    let top = parse_usize("$top", value)?;
                    if top > max_top {
                        return Err(QueryError::TopTooLarge {
                            requested: top,
                            max: max_top,
                        });
                    }
                    options.top = Some(top);
                }
                "$skip" => options.skip = parse_usize("$skip", value)?,
                "$count" => options.count = parse_bool(value)?,
                other if other.starts_with('$') => {
                    return Err(QueryError::UnknownOption(other.to_string()))
                }
                _ => {}
            }
        }
        Ok(options)
    }

    pub fn select(mut self, fields: &[Field]) -> Self {
        self.select = fields.to_vec();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: Field, direction: Direction) -> Self {
        self.order_by.push(OrderKey { field, direction });
        self
    }

    pub fn top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    /// Properties to emit, in output order.
    pub fn projection(&self) -> &[Field] {
        if self.select.is_empty() {
            &Field::ALL[..]
        } else {
            self.select.as_slice()
        }
    }
}

fn parse_select(value: &str) -> Result<Vec<Field>, QueryError> {
    let mut fields = Vec::new();
    for item in value.split(',') {
        let item = item.trim();
        if item == "*" {
            return Ok(Vec::new());
        }
        let field = Field::parse(item)?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

fn parse_order_by(value: &str) -> Result<Vec<OrderKey>, QueryError> {
    value
        .split(',')
        .map(|clause| {
            let mut parts = clause.split_whitespace();
            let field = parts
                .next()
                .ok_or_else(|| QueryError::InvalidOrder(clause.trim().to_string()))?;
            let field = Field::parse(field)?;
            let direction = match parts.next() {
                None => Direction::Asc,
                Some(d) if d.eq_ignore_ascii_case("asc") => Direction::Asc,
                Some(d) if d.eq_ignore_ascii_case("desc") => Direction::Desc,
                Some(_) => return Err(QueryError::InvalidOrder(clause.trim().to_string())),
            };
            if parts.next().is_some() {
                return Err(QueryError::InvalidOrder(clause.trim().to_string()));
            }
            Ok(OrderKey { field, direction })
        })
        .collect()
}

fn parse_usize(option: &'static str, value: &str) -> Result<usize, QueryError> {
    value.trim().parse().map_err(|_| QueryError::InvalidNumber {
        option,
        value: value.to_string(),
    })
}

fn parse_bool(value: &str) -> Result<bool, QueryError> {
    match value.trim() {
        v if v.eq_ignore_ascii_case("true") => Ok(true),
        v if v.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(QueryError::InvalidBoolean(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<QueryOptions, QueryError> {
        QueryOptions::from_params(pairs.iter().copied(), 100_000)
    }

    #[test]
    fn parses_dashboard_latest_probe() {
        let options = parse(&[("$select", "Date"), ("$orderby", "Date desc"), ("$top", "1")]).unwrap();
        assert_eq!(options.select, vec![Field::Date]);
        assert_eq!(
            options.order_by,
            vec![OrderKey {
                field: Field::Date,
                direction: Direction::Desc
            }]
        );
        assert_eq!(options.top, Some(1));
        assert!(!options.count);
    }

    #[test]
    fn select_star_and_duplicates() {
        let options = parse(&[("$select", "*")]).unwrap();
        assert_eq!(options.projection(), &Field::ALL);

        let options = parse(&[("$select", "Country, Count,country")]).unwrap();
        assert_eq!(options.projection(), &[Field::Country, Field::Count]);
    }

    #[test]
    fn multi_key_order_by_defaults_to_ascending() {
        let options = parse(&[("$orderby", "Country, Count DESC")]).unwrap();
        assert_eq!(options.order_by[0].direction, Direction::Asc);
        assert_eq!(options.order_by[1].field, Field::Count);
        assert_eq!(options.order_by[1].direction, Direction::Desc);
    }

    #[test]
    fn rejects_bad_order_clauses() {
        assert!(matches!(parse(&[("$orderby", "Count sideways")]), Err(QueryError::InvalidOrder(_))));
        assert!(matches!(parse(&[("$orderby", "Count desc,")]), Err(QueryError::InvalidOrder(_))));
        assert!(matches!(parse(&[("$orderby", "Count desc asc")]), Err(QueryError::InvalidOrder(_))));
    }

    #[test]
    fn top_is_bounded() {
        assert!(matches!(
            parse(&[("$top", "100001")]),
            Err(QueryError::TopTooLarge { requested: 100_001, max: 100_000 })
        ));
        assert!(matches!(parse(&[("$top", "-1")]), Err(QueryError::InvalidNumber { option: "$top", .. })));
        assert_eq!(parse(&[("$top", "0")]).unwrap().top, Some(0));
    }

    #[test]
    fn count_and_skip() {
        let options = parse(&[("$count", "TRUE"), ("$skip", "20")]).unwrap();
        assert!(options.count);
        assert_eq!(options.skip, 20);
        assert!(matches!(parse(&[("$count", "yes")]), Err(QueryError::InvalidBoolean(_))));
    }

    #[test]
    fn unknown_dollar_options_are_rejected_but_plain_params_ignored() {
        assert_eq!(
            parse(&[("$expand", "Country")]),
            Err(QueryError::UnknownOption("$expand".to_string()))
        );
        assert_eq!(parse(&[("cache", "1")]).unwrap(), QueryOptions::default());
    }
}
