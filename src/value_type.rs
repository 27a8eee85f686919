//! The value type grammar of stored variables: primitives, tuples,
//! tagged unions, enumerations and fixed-rank arrays. The engine itself
//! treats element payloads as opaque bytes; the only things it asks of a
//! type are its byte size and its serialized type string, which lives in
//! the variable's page.

use std::io::Read;

use crate::{
    error::{Error, ErrorKind, Result},
    io::{read_exact, read_into, ByteWriter, Decodeable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl Prim {
    pub fn byte_size(self) -> u64 {
        match self {
            Prim::U8 | Prim::I8 => 1,
            Prim::U16 | Prim::I16 => 2,
            Prim::U32 | Prim::I32 | Prim::F32 => 4,
            Prim::U64 | Prim::I64 | Prim::F64 => 8,
        }
    }

    fn tag(self) -> u8 {
        match self {
            Prim::U8 => 0,
            Prim::U16 => 1,
            Prim::U32 => 2,
            Prim::U64 => 3,
            Prim::I8 => 4,
            Prim::I16 => 5,
            Prim::I32 => 6,
            Prim::I64 => 7,
            Prim::F32 => 8,
            Prim::F64 => 9,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Prim::U8,
            1 => Prim::U16,
            2 => Prim::U32,
            3 => Prim::U64,
            4 => Prim::I8,
            5 => Prim::I16,
            6 => Prim::I32,
            7 => Prim::I64,
            8 => Prim::F32,
            9 => Prim::F64,
            _ => {
                return Err(Error::new(
                    ErrorKind::Corrupt,
                    &format!("unknown primitive tag {}", tag),
                ))
            }
        })
    }
}

const VT_PRIM: u8 = 1;
const VT_TUPLE: u8 = 2;
const VT_UNION: u8 = 3;
const VT_ENUM: u8 = 4;
const VT_ARRAY: u8 = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    Prim(Prim),
    /// Fixed product of member types.
    Tuple(Vec<ValueType>),
    /// One tag byte plus the widest member.
    Union(Vec<(String, ValueType)>),
    /// One tag byte; at most 256 variants.
    Enumeration(Vec<String>),
    /// Fixed-rank array: element type times the product of the dims.
    Array(Box<ValueType>, Vec<u64>),
}

impl ValueType {
    /// The serialized size of one element of this type.
    pub fn byte_size(&self) -> Result<u64> {
        match self {
            ValueType::Prim(p) => Ok(p.byte_size()),
            ValueType::Tuple(members) => {
                if members.is_empty() {
                    return Err(Error::new(ErrorKind::InvalidArgument, "empty tuple type"));
                }
                let mut total = 0u64;
                for m in members {
                    total = total
                        .checked_add(m.byte_size()?)
                        .ok_or_else(|| Error::new(ErrorKind::Arith, "tuple size overflow"))?;
                }
                Ok(total)
            }
            ValueType::Union(members) => {
                if members.is_empty() {
                    return Err(Error::new(ErrorKind::InvalidArgument, "empty union type"));
                }
                let mut widest = 0u64;
                for (_, m) in members {
                    widest = widest.max(m.byte_size()?);
                }
                widest
                    .checked_add(1)
                    .ok_or_else(|| Error::new(ErrorKind::Arith, "union size overflow"))
            }
            ValueType::Enumeration(variants) => {
                if variants.is_empty() || variants.len() > 256 {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "enumeration needs 1 to 256 variants",
                    ));
                }
                Ok(1)
            }
            ValueType::Array(elem, dims) => {
                if dims.is_empty() {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "array type needs at least one dimension",
                    ));
                }
                let mut count = 1u64;
                for &d in dims {
                    count = count
                        .checked_mul(d)
                        .ok_or_else(|| Error::new(ErrorKind::Arith, "array size overflow"))?;
                }
                count
                    .checked_mul(elem.byte_size()?)
                    .ok_or_else(|| Error::new(ErrorKind::Arith, "array size overflow"))
            }
        }
    }
}

fn write_name(w: &mut ByteWriter, name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 255 {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "member name must be 1 to 255 bytes",
        ));
    }
    w.write(&(bytes.len() as u8));
    w.write_bytes(bytes);
    Ok(())
}

fn read_name<R: Read>(r: &mut R) -> Result<String> {
    let len: u8 = read_into(r)?;
    let bytes = read_exact(r, len as usize)?;
    String::from_utf8(bytes)
        .map_err(|_| Error::new(ErrorKind::Corrupt, "member name is not utf-8"))
}

impl ValueType {
    /// The type string stored in a variable page.
    pub fn to_type_string(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        self.encode_into(&mut w)?;
        Ok(w.to_bytes())
    }

    fn encode_into(&self, w: &mut ByteWriter) -> Result<()> {
        match self {
            ValueType::Prim(p) => {
                w.write(&VT_PRIM);
                w.write(&p.tag());
            }
            ValueType::Tuple(members) => {
                w.write(&VT_TUPLE);
                w.write(&(members.len() as u16));
                for m in members {
                    m.encode_into(w)?;
                }
            }
            ValueType::Union(members) => {
                w.write(&VT_UNION);
                w.write(&(members.len() as u16));
                for (name, m) in members {
                    write_name(w, name)?;
                    m.encode_into(w)?;
                }
            }
            ValueType::Enumeration(variants) => {
                w.write(&VT_ENUM);
                w.write(&(variants.len() as u16));
                for v in variants {
                    write_name(w, v)?;
                }
            }
            ValueType::Array(elem, dims) => {
                w.write(&VT_ARRAY);
                w.write(&(dims.len() as u8));
                for d in dims {
                    w.write(d);
                }
                elem.encode_into(w)?;
            }
        }
        Ok(())
    }
}

impl Decodeable for ValueType {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self> {
        let tag: u8 = read_into(r)?;
        match tag {
            VT_PRIM => {
                let p: u8 = read_into(r)?;
                Ok(ValueType::Prim(Prim::from_tag(p)?))
            }
            VT_TUPLE => {
                let n: u16 = read_into(r)?;
                let mut members = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    members.push(ValueType::decode_from(r)?);
                }
                Ok(ValueType::Tuple(members))
            }
            VT_UNION => {
                let n: u16 = read_into(r)?;
                let mut members = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let name = read_name(r)?;
                    members.push((name, ValueType::decode_from(r)?));
                }
                Ok(ValueType::Union(members))
            }
            VT_ENUM => {
                let n: u16 = read_into(r)?;
                let mut variants = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    variants.push(read_name(r)?);
                }
                Ok(ValueType::Enumeration(variants))
            }
            VT_ARRAY => {
                let rank: u8 = read_into(r)?;
                let mut dims = Vec::with_capacity(rank as usize);
                for _ in 0..rank {
                    dims.push(read_into::<u64, _>(r)?);
                }
                let elem = ValueType::decode_from(r)?;
                Ok(ValueType::Array(Box::new(elem), dims))
            }
            _ => Err(Error::new(
                ErrorKind::Corrupt,
                &format!("unknown type tag {}", tag),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_prim_sizes() {
        assert_eq!(ValueType::Prim(Prim::U32).byte_size().unwrap(), 4);
        assert_eq!(ValueType::Prim(Prim::F64).byte_size().unwrap(), 8);
    }

    #[test]
    fn test_composite_sizes() {
        let tuple = ValueType::Tuple(vec![
            ValueType::Prim(Prim::U32),
            ValueType::Prim(Prim::F64),
            ValueType::Prim(Prim::U8),
        ]);
        assert_eq!(tuple.byte_size().unwrap(), 13);

        let union = ValueType::Union(vec![
            ("a".into(), ValueType::Prim(Prim::U16)),
            ("b".into(), tuple.clone()),
        ]);
        assert_eq!(union.byte_size().unwrap(), 14);

        let en = ValueType::Enumeration(vec!["x".into(), "y".into()]);
        assert_eq!(en.byte_size().unwrap(), 1);

        let arr = ValueType::Array(Box::new(ValueType::Prim(Prim::F32)), vec![3, 4]);
        assert_eq!(arr.byte_size().unwrap(), 48);
    }

    #[test]
    fn test_type_string_round_trip() {
        let t = ValueType::Array(
            Box::new(ValueType::Union(vec![
                ("scalar".into(), ValueType::Prim(Prim::I64)),
                (
                    "pair".into(),
                    ValueType::Tuple(vec![
                        ValueType::Prim(Prim::F32),
                        ValueType::Prim(Prim::F32),
                    ]),
                ),
                ("flag".into(), ValueType::Enumeration(vec!["on".into(), "off".into()])),
            ])),
            vec![7],
        );

        let bytes = t.to_type_string().unwrap();
        let back = ValueType::decode_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_degenerate_types_rejected() {
        assert_eq!(
            ValueType::Tuple(vec![]).byte_size().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            ValueType::Enumeration(vec![]).byte_size().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        let too_many = ValueType::Enumeration((0..300).map(|i| format!("v{}", i)).collect());
        assert_eq!(
            too_many.byte_size().unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }
}
