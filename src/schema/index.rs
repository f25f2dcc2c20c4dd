use crate::storage::page::PageId;

/// Physical structure backing an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// B-tree keyed by the column tuple; supports range scans.
    Ordered,
    /// Bucket-directory hash structure; exact-match only.
    Hash,
}

/// Index definition, as stored in the catalog.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    pub unique: bool,
    pub root: PageId,
}

impl IndexDef {
    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    /// Serialize index definition.
    /// Format: [name][table][kind u8][unique u8][root u32][ncols u16][cols...]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_str(&mut buf, &self.name);
        write_str(&mut buf, &self.table);
        buf.push(match self.kind {
            IndexKind::Ordered => 1,
            IndexKind::Hash => 2,
        });
        buf.push(self.unique as u8);
        buf.extend_from_slice(&self.root.to_le_bytes());
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for col in &self.columns {
            write_str(&mut buf, col);
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<IndexDef> {
        let mut offset = 0;
        let name = read_str(data, &mut offset)?;
        let table = read_str(data, &mut offset)?;
        let kind = match *data.get(offset)? {
            1 => IndexKind::Ordered,
            2 => IndexKind::Hash,
            _ => return None,
        };
        offset += 1;
        let unique = *data.get(offset)? != 0;
        offset += 1;
        if data.len() < offset + 4 {
            return None;
        }
        let root = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        offset += 4;
        if data.len() < offset + 2 {
            return None;
        }
        let ncols = u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        let mut columns = Vec::with_capacity(ncols);
        for _ in 0..ncols {
            columns.push(read_str(data, &mut offset)?);
        }
        Some(IndexDef {
            name,
            table,
            columns,
            kind,
            unique,
            root,
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_def_round_trip() {
        let def = IndexDef {
            name: "ix_users_email".into(),
            table: "users".into(),
            columns: vec!["email".into(), "tenant".into()],
            kind: IndexKind::Ordered,
            unique: true,
            root: 17,
        };
        let bytes = def.serialize();
        let back = IndexDef::deserialize(&bytes).unwrap();
        assert_eq!(back.name, def.name);
        assert_eq!(back.columns, def.columns);
        assert_eq!(back.kind, IndexKind::Ordered);
        assert!(back.unique);
        assert!(back.is_composite());
        assert_eq!(back.root, 17);
    }
}
