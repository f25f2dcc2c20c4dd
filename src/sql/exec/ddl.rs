/// DDL execution: catalog materialization inside the statement's
/// transaction. CREATE INDEX backfills from a full table scan; drops
/// return every page of the structure to the free list.
use crate::btree::ops::BTree;
use crate::error::{Result, ZqError};
use crate::index::{key_from_row, IndexHandle};
use crate::schema::catalog::TableDef;
use crate::schema::column::ColumnDef;
use crate::schema::index::{IndexDef, IndexKind};
use crate::sql::ast::*;
use crate::sql::exec::{ExecCtx, ExecResult, Row};
use crate::storage::page::PageKind;
use crate::storage::page_store::PageStore;
use crate::storage::table::Table;
use crate::types::{DataType, Value};

pub fn exec_ddl<S: PageStore>(ctx: &mut ExecCtx<'_, S>, stmt: &Stmt) -> Result<ExecResult> {
    match stmt {
        Stmt::CreateTable {
            name,
            if_not_exists,
            columns,
        } => create_table(ctx, name, *if_not_exists, columns),
        Stmt::CreateIndex {
            name,
            table,
            columns,
            unique,
            if_not_exists,
            using_hash,
        } => create_index(
            ctx,
            name,
            table,
            columns,
            *unique,
            *if_not_exists,
            *using_hash,
        ),
        Stmt::DropTable { name, if_exists } => drop_table(ctx, name, *if_exists),
        Stmt::DropIndex { name, if_exists } => drop_index(ctx, name, *if_exists),
        _ => unreachable!("dispatched as DDL"),
    }
}

fn create_table<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    name: &str,
    if_not_exists: bool,
    columns: &[ColumnSpec],
) -> Result<ExecResult> {
    if name.is_empty() || name.starts_with('#') {
        return Err(ZqError::Misuse(format!("invalid table name: {:?}", name)));
    }
    if ctx.catalog.get_table(ctx.store, name)?.is_some() {
        if if_not_exists {
            return Ok(ExecResult::Ok);
        }
        return Err(ZqError::Constraint(format!(
            "table {} already exists",
            name
        )));
    }
    if columns.is_empty() {
        return Err(ZqError::Misuse("a table needs at least one column".into()));
    }
    let mut seen = std::collections::HashSet::new();
    let mut primary_keys = 0;
    for spec in columns {
        if !seen.insert(spec.name.to_ascii_lowercase()) {
            return Err(ZqError::Misuse(format!(
                "duplicate column name: {}",
                spec.name
            )));
        }
        if spec.primary_key {
            primary_keys += 1;
        }
    }
    if primary_keys > 1 {
        return Err(ZqError::Misuse(format!(
            "table {} has more than one primary key",
            name
        )));
    }

    let defs: Vec<ColumnDef> = columns
        .iter()
        .map(|spec| {
            let data_type = spec
                .declared_type
                .as_deref()
                .map(DataType::from_declared)
                .unwrap_or(DataType::Text);
            ColumnDef {
                name: spec.name.clone(),
                data_type,
                is_primary_key: spec.primary_key,
                is_unique: spec.unique,
                is_nullable: !spec.not_null,
                auto_increment: spec.autoincrement,
                default_expr: spec.default.as_ref().map(|e| e.to_string()),
                check_expr: spec.check.as_ref().map(|e| e.to_string()),
                references: spec
                    .references
                    .as_ref()
                    .map(|(t, c)| (t.clone(), c.clone().unwrap_or_default())),
            }
        })
        .collect();

    let root = BTree::create(ctx.store, PageKind::TableLeaf)?.root_page();
    let def = TableDef {
        name: name.to_string(),
        columns: defs,
        root,
        next_rowid: 1,
        row_count: 0,
    };
    ctx.catalog.create_table(ctx.store, &def)?;

    // A non-INTEGER primary key is enforced through an implicit unique
    // index; so is each column-level UNIQUE.
    if let Some(pk) = def.non_alias_primary_key() {
        implicit_unique_index(ctx, &def, &def.columns[pk].name.clone(), "pk")?;
    }
    for column in &def.columns {
        if column.is_unique {
            implicit_unique_index(ctx, &def, &column.name.clone(), "unique")?;
        }
    }

    ctx.store.bump_schema_cookie();
    Ok(ExecResult::Ok)
}

fn implicit_unique_index<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    table: &TableDef,
    column: &str,
    suffix: &str,
) -> Result<()> {
    let root = IndexHandle::allocate(ctx.store, IndexKind::Ordered)?;
    ctx.catalog.create_index(
        ctx.store,
        &IndexDef {
            name: format!("{}_{}_{}", table.name, column, suffix),
            table: table.name.clone(),
            columns: vec![column.to_string()],
            kind: IndexKind::Ordered,
            unique: true,
            root,
        },
    )
}

fn create_index<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    name: &str,
    table: &str,
    columns: &[String],
    unique: bool,
    if_not_exists: bool,
    using_hash: bool,
) -> Result<ExecResult> {
    if ctx.catalog.get_index(ctx.store, name)?.is_some() {
        if if_not_exists {
            return Ok(ExecResult::Ok);
        }
        return Err(ZqError::Constraint(format!(
            "index {} already exists",
            name
        )));
    }
    let table_def = ctx.catalog.expect_table(ctx.store, table)?;
    for column in columns {
        if table_def.column_index(column).is_none() {
            return Err(ZqError::NotFound(format!(
                "no such column: {}.{}",
                table, column
            )));
        }
    }

    let kind = if using_hash {
        IndexKind::Hash
    } else {
        IndexKind::Ordered
    };
    let root = IndexHandle::allocate(ctx.store, kind)?;
    let def = IndexDef {
        name: name.to_string(),
        table: table.to_string(),
        columns: columns.to_vec(),
        kind,
        unique,
        root,
    };
    ctx.catalog.create_index(ctx.store, &def)?;

    // Backfill from a full scan; a uniqueness violation aborts the
    // statement here, before the index becomes visible to queries.
    let handle = IndexHandle::new(def);
    let t = Table::load(ctx.store, ctx.catalog, table)?;
    let mut cursor = t.scan(ctx.store, None)?;
    while let Some((rowid, values)) = cursor.next(ctx.store)? {
        let key = key_from_row(&handle.def, &t.def, &values)?;
        handle.insert_entry(ctx.store, &key, rowid)?;
    }

    ctx.store.bump_schema_cookie();
    Ok(ExecResult::Ok)
}

fn drop_table<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    name: &str,
    if_exists: bool,
) -> Result<ExecResult> {
    let Some(def) = ctx.catalog.get_table(ctx.store, name)? else {
        if if_exists {
            return Ok(ExecResult::Ok);
        }
        return Err(ZqError::NotFound(format!("no such table: {}", name)));
    };

    for index in ctx.catalog.indexes_for_table(ctx.store, name)? {
        IndexHandle::new(index.clone()).destroy(ctx.store)?;
        ctx.catalog.drop_index(ctx.store, &index.name)?;
    }
    BTree::open(def.root).destroy(ctx.store)?;
    ctx.catalog.drop_table(ctx.store, name)?;
    ctx.store.bump_schema_cookie();
    Ok(ExecResult::Ok)
}

fn drop_index<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    name: &str,
    if_exists: bool,
) -> Result<ExecResult> {
    let Some(def) = ctx.catalog.get_index(ctx.store, name)? else {
        if if_exists {
            return Ok(ExecResult::Ok);
        }
        return Err(ZqError::NotFound(format!("no such index: {}", name)));
    };
    IndexHandle::new(def).destroy(ctx.store)?;
    ctx.catalog.drop_index(ctx.store, name)?;
    ctx.store.bump_schema_cookie();
    Ok(ExecResult::Ok)
}

/// Informational pragmas answered from the store; the session layer
/// intercepts the ones that need pager or connection state. Unknown
/// pragmas are accepted and ignored.
pub fn exec_pragma<S: PageStore>(
    ctx: &mut ExecCtx<'_, S>,
    name: &str,
    _value: Option<&Expr>,
) -> Result<ExecResult> {
    let row = |name: &str, value: Value| Row {
        values: vec![(name.to_string(), value)],
    };
    match name.to_ascii_lowercase().as_str() {
        "page_size" => Ok(ExecResult::Rows(vec![row(
            "page_size",
            Value::Integer(crate::storage::page::PAGE_SIZE as i64),
        )])),
        "page_count" => Ok(ExecResult::Rows(vec![row(
            "page_count",
            Value::Integer(ctx.store.page_count() as i64),
        )])),
        "table_list" => {
            let mut rows = Vec::new();
            for table in ctx.catalog.list_tables(ctx.store)? {
                rows.push(row("name", Value::Text(table.name)));
            }
            Ok(ExecResult::Rows(rows))
        }
        _ => Ok(ExecResult::Ok),
    }
}
