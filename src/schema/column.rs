use crate::types::DataType;

/// Column definition, as stored in the catalog's schema descriptor.
///
/// DEFAULT and CHECK are kept as expression source text and re-parsed into
/// expression trees when a table handle is materialized; they are evaluated
/// at insertion time, never at schema time.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub is_nullable: bool,
    pub auto_increment: bool,
    pub default_expr: Option<String>,
    pub check_expr: Option<String>,
    /// REFERENCES table(column). Accepted syntax; enforcement not opted in.
    pub references: Option<(String, String)>,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        ColumnDef {
            name: name.to_string(),
            data_type,
            is_primary_key: false,
            is_unique: false,
            is_nullable: true,
            auto_increment: false,
            default_expr: None,
            check_expr: None,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn with_default(mut self, expr: &str) -> Self {
        self.default_expr = Some(expr.to_string());
        self
    }

    /// Serialize column definition to bytes.
    /// Format: [name_len u16][name][type u8][flags u8]
    ///         [default_len u16][default][check_len u16][check]
    ///         [ref_table_len u16][ref_table][ref_col_len u16][ref_col]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        buf.push(match self.data_type {
            DataType::Integer => 1,
            DataType::Real => 2,
            DataType::Text => 3,
            DataType::Blob => 4,
            DataType::Boolean => 5,
            DataType::Json => 6,
        });
        let mut flags: u8 = 0;
        if self.is_primary_key {
            flags |= 0x01;
        }
        if self.is_unique {
            flags |= 0x02;
        }
        if self.is_nullable {
            flags |= 0x04;
        }
        if self.auto_increment {
            flags |= 0x08;
        }
        buf.push(flags);
        write_str(&mut buf, self.default_expr.as_deref().unwrap_or(""));
        write_str(&mut buf, self.check_expr.as_deref().unwrap_or(""));
        let (rt, rc) = self
            .references
            .as_ref()
            .map(|(t, c)| (t.as_str(), c.as_str()))
            .unwrap_or(("", ""));
        write_str(&mut buf, rt);
        write_str(&mut buf, rc);
        buf
    }

    /// Deserialize one column definition. Returns the def and bytes consumed.
    pub fn deserialize(data: &[u8]) -> Option<(ColumnDef, usize)> {
        let mut offset = 0;
        let name = read_str(data, &mut offset)?;
        let data_type = match *data.get(offset)? {
            1 => DataType::Integer,
            2 => DataType::Real,
            3 => DataType::Text,
            4 => DataType::Blob,
            5 => DataType::Boolean,
            6 => DataType::Json,
            _ => return None,
        };
        offset += 1;
        let flags = *data.get(offset)?;
        offset += 1;
        let default_expr = read_str(data, &mut offset)?;
        let check_expr = read_str(data, &mut offset)?;
        let ref_table = read_str(data, &mut offset)?;
        let ref_col = read_str(data, &mut offset)?;

        Some((
            ColumnDef {
                name,
                data_type,
                is_primary_key: flags & 0x01 != 0,
                is_unique: flags & 0x02 != 0,
                is_nullable: flags & 0x04 != 0,
                auto_increment: flags & 0x08 != 0,
                default_expr: (!default_expr.is_empty()).then_some(default_expr),
                check_expr: (!check_expr.is_empty()).then_some(check_expr),
                references: (!ref_table.is_empty()).then_some((ref_table, ref_col)),
            },
            offset,
        ))
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(data: &[u8], offset: &mut usize) -> Option<String> {
    if data.len() < *offset + 2 {
        return None;
    }
    let len = u16::from_le_bytes(data[*offset..*offset + 2].try_into().unwrap()) as usize;
    *offset += 2;
    if data.len() < *offset + len {
        return None;
    }
    let s = String::from_utf8(data[*offset..*offset + len].to_vec()).ok()?;
    *offset += len;
    Some(s)
}
