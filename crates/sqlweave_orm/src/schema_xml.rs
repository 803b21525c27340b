use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::{Document, Node};

use sqlweave_core::{Value, ValueType};

use crate::error::OrmError;
use crate::schema::{
    mk_xml_name, Cascade, Column, ColumnFlags, Relation, RelationAttrs, RelationKind, Schema,
    Table,
};

/// Parse a `<schema>` document into a Schema. Foreign keys are not
/// resolved; use [`load_schema_from_str`] for a ready-to-use schema.
pub fn parse_schema(xml: &str) -> Result<Schema, OrmError> {
    let doc = Document::parse(xml)
        .map_err(|e| OrmError::XmlParse(format!("XML tree parse error: {}", e)))?;
    let root = doc.root_element();
    if root.tag_name().name() != "schema" {
        return Err(OrmError::XmlParse(format!(
            "unknown element '{}' found during parse of root element, 'schema' expected",
            root.tag_name().name()
        )));
    }
    let mut schema = Schema::new();
    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "table" => schema.add_table(parse_table(&child)?)?,
            "relation" => {
                if let Some(rel) = parse_relation(&child)? {
                    schema.add_relation(rel);
                }
            }
            other => {
                return Err(OrmError::XmlParse(format!(
                    "unknown element '{}' found during parse of element 'schema'",
                    other
                )));
            }
        }
    }
    Ok(schema)
}

/// Parse, resolve foreign keys, and (optionally) run the cycle check.
pub fn load_schema_from_str(xml: &str, check: bool) -> Result<Schema, OrmError> {
    let mut schema = parse_schema(xml)?;
    schema.fill_fkeys()?;
    if check {
        schema.check_cycles()?;
    }
    Ok(schema)
}

/// Read a schema config file.
pub fn load_schema(path: &std::path::Path, check: bool) -> Result<Schema, OrmError> {
    let xml = std::fs::read_to_string(path)
        .map_err(|e| OrmError::XmlParse(format!("can't read file '{}': {}", path.display(), e)))?;
    load_schema_from_str(&xml, check)
}

fn mandatory<'a>(node: &'a Node<'_, '_>, attr: &str) -> Result<&'a str, OrmError> {
    match node.attribute(attr) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(OrmError::MandatoryAttributeAbsent {
            element: node.tag_name().name().to_string(),
            attr: attr.to_string(),
        }),
    }
}

fn parse_table(node: &Node<'_, '_>) -> Result<Table, OrmError> {
    let name = mandatory(node, "name")?;
    let xml_name = node.attribute("xml-name").unwrap_or("");
    let class_name = node.attribute("class").unwrap_or("");
    let mut table = Table::new(name, xml_name, class_name);
    if let Some(seq) = node.attribute("sequence") {
        table.set_seq_name(seq);
    }
    if node.attribute("autoinc").is_some() {
        table.set_autoinc(true);
    }
    for child in node.children().filter(Node::is_element) {
        if child.tag_name().name() != "column" {
            return Err(OrmError::XmlParse(format!(
                "unknown element '{}' found during parse of element 'table'",
                child.tag_name().name()
            )));
        }
        table.add_column(parse_column(&child)?)?;
    }
    Ok(table)
}

fn parse_default(value: &str, ty: ValueType, field: &str) -> Result<Value, OrmError> {
    let bad = |what: &str| {
        OrmError::XmlParse(format!(
            "wrong default value '{}' for {} element '{}'",
            value, what, field
        ))
    };
    match ty {
        ValueType::Float => value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| bad("float")),
        ValueType::Decimal => {
            value.parse::<f64>().map_err(|_| bad("decimal"))?;
            Ok(Value::Decimal(value.to_string()))
        }
        ValueType::Int | ValueType::LongInt => value
            .parse::<i64>()
            .map(Value::LongInt)
            .map_err(|_| bad("integer")),
        ValueType::DateTime => {
            if value.eq_ignore_ascii_case("sysdate") {
                Ok(Value::Str("sysdate".to_string()))
            } else {
                Err(bad("datetime"))
            }
        }
        _ => Ok(Value::Str(value.to_string())),
    }
}

fn parse_column(node: &Node<'_, '_>) -> Result<Column, OrmError> {
    let name = mandatory(node, "name")?;
    let type_name = mandatory(node, "type")?;
    let ty = ValueType::from_name(type_name).ok_or_else(|| OrmError::WrongColumnType {
        ty: type_name.to_string(),
        field: name.to_string(),
    })?;

    let size: usize = match node.attribute("size") {
        Some(s) => s
            .parse()
            .map_err(|_| OrmError::XmlParse(format!("bad size '{}' of column '{}'", s, name)))?,
        None => 0,
    };
    if size > 0 && ty != ValueType::Str {
        return Err(OrmError::InvalidCombination(
            "size must not be used for a non-string type".to_string(),
        ));
    }

    let mut flags = ColumnFlags::empty();
    let mut fk: Option<(String, Option<String>)> = None;
    let mut index_name: Option<String> = None;
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "read-only" => flags |= ColumnFlags::RO,
            "primary-key" => flags |= ColumnFlags::PK,
            "foreign-key" => {
                let table = mandatory(&child, "table")?.to_string();
                let key = child.attribute("key").map(str::to_string);
                fk = Some((table, key));
            }
            "index" => index_name = child.text().map(str::to_string),
            other => {
                return Err(OrmError::XmlParse(format!(
                    "unknown element '{}' found during parse of element 'column'",
                    other
                )));
            }
        }
    }

    let mut nullable = !flags.contains(ColumnFlags::PK);
    if node.attribute("null") == Some("false") {
        nullable = false;
    }
    if nullable {
        flags |= ColumnFlags::NULLABLE;
    }

    let mut column = Column::new(name, ty, size, flags);
    if let Some(default) = node.attribute("default") {
        column = column.with_default(parse_default(default, ty, name)?);
    }
    if let Some((table, key)) = fk {
        column = column.with_fk(table, key);
    }
    if let Some(prop) = node.attribute("property") {
        column = column.with_prop_name(prop);
    }
    if let Some(xml_name) = node.attribute("xml-name") {
        column = column.with_xml_name(xml_name);
    }
    if let Some(index) = index_name {
        column = column.with_index_name(index);
    }
    Ok(column)
}

fn parse_relation_side(
    node: &Node<'_, '_>,
    attr_names: &[&str],
) -> Result<(String, RelationAttrs), OrmError> {
    let class = mandatory(node, "class")?.to_string();
    let mut attrs = RelationAttrs::new();
    for name in attr_names {
        if let Some(value) = node.attribute(*name) {
            attrs.insert((*name).to_string(), value.to_string());
        }
    }
    Ok((class, attrs))
}

fn parse_relation(node: &Node<'_, '_>) -> Result<Option<Relation>, OrmError> {
    let rtype = mandatory(node, "type")?;
    let cascade = match node.attribute("cascade").unwrap_or("restrict") {
        "delete" => Cascade::Delete,
        "set-null" => Cascade::Nullify,
        "restrict" => Cascade::Restrict,
        other => {
            return Err(OrmError::XmlParse(format!(
                "unknown 'cascade' value: {}",
                other
            )));
        }
    };
    let kind = match rtype {
        "one-to-many" => RelationKind::OneToMany,
        "many-to-many" => RelationKind::ManyToMany,
        "parent-to-child" => RelationKind::ParentToChild,
        other => {
            return Err(OrmError::XmlParse(format!(
                "unknown 'type' value: {}",
                other
            )));
        }
    };
    let mut one: Option<(String, RelationAttrs)> = None;
    let mut many: Option<(String, RelationAttrs)> = None;
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "one" => one = Some(parse_relation_side(&child, &["property", "use-list"])?),
            "many" => {
                many = Some(parse_relation_side(
                    &child,
                    &["property", "order-by", "key"],
                )?)
            }
            other => {
                return Err(OrmError::XmlParse(format!(
                    "unknown element '{}' found during parse of element 'relation'",
                    other
                )));
            }
        }
    }
    let (one, attrs_one) = one.ok_or_else(|| OrmError::XmlParse(
        "relation without a 'one' side".to_string(),
    ))?;
    let (many, attrs_many) = many.ok_or_else(|| OrmError::XmlParse(
        "relation without a 'many' side".to_string(),
    ))?;
    Ok(Some(Relation::new(
        kind, one, attrs_one, many, attrs_many, cascade,
    )))
}

// -- writing -----------------------------------------------------------------

type XmlWriter = Writer<Vec<u8>>;

fn xml_err<E: std::fmt::Display>(e: E) -> OrmError {
    OrmError::XmlParse(format!("can't serialize schema: {}", e))
}

fn write_column(w: &mut XmlWriter, column: &Column) -> Result<(), OrmError> {
    let mut el = BytesStart::new("column");
    el.push_attribute(("name", column.name()));
    el.push_attribute(("type", column.value_type().name()));
    if column.size() > 0 {
        el.push_attribute(("size", column.size().to_string().as_str()));
    }
    if !column.prop_name().is_empty()
        && column.prop_name() != column.name().to_ascii_lowercase()
    {
        el.push_attribute(("property", column.prop_name()));
    }
    if column.xml_name() != mk_xml_name(column.name(), "") {
        el.push_attribute(("xml-name", column.xml_name()));
    }
    if !column.default_value().is_null() {
        if let Ok(default) = column.default_value().as_string() {
            el.push_attribute(("default", default.as_str()));
        }
    }
    if !column.is_nullable() && !column.is_pk() {
        el.push_attribute(("null", "false"));
    }

    let has_children = column.is_ro()
        || column.is_pk()
        || column.has_fk()
        || column.index_name().is_some();
    if !has_children {
        w.write_event(Event::Empty(el)).map_err(xml_err)?;
        return Ok(());
    }
    w.write_event(Event::Start(el)).map_err(xml_err)?;
    if column.is_ro() {
        w.write_event(Event::Empty(BytesStart::new("read-only")))
            .map_err(xml_err)?;
    }
    if column.is_pk() {
        w.write_event(Event::Empty(BytesStart::new("primary-key")))
            .map_err(xml_err)?;
    }
    if let Some(fk_table) = column.fk_table_name() {
        let mut fk = BytesStart::new("foreign-key");
        fk.push_attribute(("table", fk_table));
        if let Some(fk_column) = column.fk_column_name() {
            fk.push_attribute(("key", fk_column));
        }
        w.write_event(Event::Empty(fk)).map_err(xml_err)?;
    }
    if let Some(index) = column.index_name() {
        w.write_event(Event::Start(BytesStart::new("index")))
            .map_err(xml_err)?;
        w.write_event(Event::Text(BytesText::new(index)))
            .map_err(xml_err)?;
        w.write_event(Event::End(BytesEnd::new("index")))
            .map_err(xml_err)?;
    }
    w.write_event(Event::End(BytesEnd::new("column")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_table(w: &mut XmlWriter, table: &Table) -> Result<(), OrmError> {
    let mut el = BytesStart::new("table");
    el.push_attribute(("name", table.name()));
    if !table.class_name().is_empty() {
        el.push_attribute(("class", table.class_name()));
    }
    if let Some(seq) = table.seq_name() {
        el.push_attribute(("sequence", seq));
    }
    if table.autoinc() {
        el.push_attribute(("autoinc", "true"));
    }
    if table.xml_name() != mk_xml_name(table.name(), "") {
        el.push_attribute(("xml-name", table.xml_name()));
    }
    w.write_event(Event::Start(el)).map_err(xml_err)?;
    for column in table.columns() {
        write_column(w, column)?;
    }
    w.write_event(Event::End(BytesEnd::new("table")))
        .map_err(xml_err)?;
    Ok(())
}

fn write_relation(w: &mut XmlWriter, rel: &Relation) -> Result<(), OrmError> {
    let mut el = BytesStart::new("relation");
    let kind = match rel.kind() {
        RelationKind::OneToMany => "one-to-many",
        RelationKind::ManyToMany => "many-to-many",
        RelationKind::ParentToChild => "parent-to-child",
    };
    el.push_attribute(("type", kind));
    let cascade = match rel.cascade() {
        Cascade::Restrict => "restrict",
        Cascade::Nullify => "set-null",
        Cascade::Delete => "delete",
    };
    el.push_attribute(("cascade", cascade));
    w.write_event(Event::Start(el)).map_err(xml_err)?;
    for (n, tag) in [(0usize, "one"), (1usize, "many")] {
        let mut side = BytesStart::new(tag);
        side.push_attribute(("class", rel.side(n)));
        for (attr, value) in rel.attrs(n) {
            side.push_attribute((attr.as_str(), value.as_str()));
        }
        w.write_event(Event::Empty(side)).map_err(xml_err)?;
    }
    w.write_event(Event::End(BytesEnd::new("relation")))
        .map_err(xml_err)?;
    Ok(())
}

/// Serialize a schema back to its XML config form.
pub fn schema_to_xml(schema: &Schema) -> Result<String, OrmError> {
    let mut w = Writer::new_with_indent(Vec::new(), b' ', 4);
    w.write_event(Event::Start(BytesStart::new("schema")))
        .map_err(xml_err)?;
    for table in schema.tables() {
        write_table(&mut w, table)?;
    }
    for rel in schema.relations() {
        write_relation(&mut w, rel)?;
    }
    w.write_event(Event::End(BytesEnd::new("schema")))
        .map_err(xml_err)?;
    String::from_utf8(w.into_inner())
        .map_err(|e| OrmError::XmlParse(format!("can't serialize schema: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<schema>
    <table name="T_CLIENT" sequence="S_CLIENT_ID" class="Client">
        <column name="ID" type="longint">
            <primary-key/>
        </column>
        <column name="NAME" type="string" size="100" null="false"/>
        <column name="CREATED" type="datetime" default="sysdate">
            <read-only/>
        </column>
    </table>
    <table name="T_ORDER" sequence="S_ORDER_ID" class="Order">
        <column name="ID" type="longint">
            <primary-key/>
        </column>
        <column name="CLIENT_ID" type="longint">
            <foreign-key table="T_CLIENT"/>
        </column>
        <column name="AMOUNT" type="decimal" default="0"/>
    </table>
    <relation type="one-to-many" cascade="delete">
        <one class="Client" property="orders"/>
        <many class="Order" property="owner"/>
    </relation>
</schema>
"#;

    #[test]
    fn test_parse_sample() {
        let schema = load_schema_from_str(SAMPLE, true).unwrap();
        assert_eq!(schema.table_count(), 2);
        let client = schema.table("T_CLIENT").unwrap();
        assert_eq!(client.seq_name(), Some("S_CLIENT_ID"));
        assert_eq!(client.class_name(), "Client");
        let id = client.column("ID").unwrap();
        assert!(id.is_pk());
        assert!(!id.is_nullable());
        let name = client.column("NAME").unwrap();
        assert_eq!(name.size(), 100);
        assert!(!name.is_nullable());
        let created = client.column("CREATED").unwrap();
        assert!(created.is_ro());
        assert_eq!(created.default_value(), &Value::Str("sysdate".to_string()));

        let order = schema.table("T_ORDER").unwrap();
        let fk = order.column("CLIENT_ID").unwrap();
        assert_eq!(fk.fk_table_name(), Some("T_CLIENT"));
        // Unresolved FK column defaults to the target's surrogate PK.
        assert_eq!(fk.fk_column_name(), Some("ID"));

        assert_eq!(schema.relations().len(), 1);
        let rel = &schema.relations()[0];
        assert_eq!(rel.cascade(), Cascade::Delete);
        assert_eq!(rel.attr(0, "property").unwrap(), "orders");
    }

    #[test]
    fn test_mandatory_attributes() {
        let err = parse_schema("<schema><table><column name=\"A\" type=\"string\"/></table></schema>")
            .unwrap_err();
        assert!(matches!(err, OrmError::MandatoryAttributeAbsent { .. }));
        let err =
            parse_schema("<schema><table name=\"T\"><column name=\"A\"/></table></schema>")
                .unwrap_err();
        assert!(matches!(err, OrmError::MandatoryAttributeAbsent { .. }));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let err = parse_schema(
            "<schema><table name=\"T\"><column name=\"A\" type=\"varchar2\"/></table></schema>",
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::WrongColumnType { .. }));
    }

    #[test]
    fn test_size_on_non_string_rejected() {
        let err = parse_schema(
            "<schema><table name=\"T\"><column name=\"A\" type=\"integer\" size=\"5\"/></table></schema>",
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::InvalidCombination(_)));
    }

    #[test]
    fn test_bad_datetime_default_rejected() {
        let err = parse_schema(
            "<schema><table name=\"T\"><column name=\"A\" type=\"datetime\" default=\"now\"/></table></schema>",
        )
        .unwrap_err();
        assert!(matches!(err, OrmError::XmlParse(_)));
    }

    #[test]
    fn test_round_trip_is_structurally_stable() {
        let first = parse_schema(SAMPLE).unwrap();
        let xml1 = schema_to_xml(&first).unwrap();
        let second = parse_schema(&xml1).unwrap();
        let xml2 = schema_to_xml(&second).unwrap();
        assert_eq!(xml1, xml2);

        assert_eq!(first.table_count(), second.table_count());
        for (a, b) in first.tables().zip(second.tables()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.class_name(), b.class_name());
            assert_eq!(a.seq_name(), b.seq_name());
            assert_eq!(a.size(), b.size());
            for (ca, cb) in a.columns().iter().zip(b.columns().iter()) {
                assert_eq!(ca.name(), cb.name());
                assert_eq!(ca.value_type(), cb.value_type());
                assert_eq!(ca.size(), cb.size());
                assert_eq!(ca.flags(), cb.flags());
                assert_eq!(ca.default_value(), cb.default_value());
                assert_eq!(ca.fk_table_name(), cb.fk_table_name());
            }
        }
        assert_eq!(first.relations().len(), second.relations().len());
    }
}
