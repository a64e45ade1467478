/*
 * BSD 2-Clause License
 *
 * Copyright (c) 2021, Khaled Emara
 * All rights reserved.
 *
 * Redistribution and use in source and binary forms, with or without
 * modification, are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 *    list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice,
 *    this list of conditions and the following disclaimer in the documentation
 *    and/or other materials provided with the distribution.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
 * AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
 * IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
 * DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
 * FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
 * DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
 * SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
 * CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
 * OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
 * OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
 */

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

pub const MESSAGE_TYPE: u16 = 0x3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// The decoded element type of a dataset or attribute.
///
/// Only the classes the read path can usefully hand to a caller are
/// represented; anything else surfaces as `UnsupportedDatatype` with the
/// on-disk class number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        signed: bool,
        byte_order: ByteOrder,
    },
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
    },
    String {
        size: u32,
        padding: StringPadding,
    },
    /// Variable-length sequence or string.  `size` is the width of the
    /// on-disk reference (length + global heap ID), not of the payload.
    VariableLength {
        size: u32,
        base: Box<Datatype>,
        is_string: bool,
    },
}

impl Datatype {
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut cur = body;
        Self::decode_from(&mut cur)
    }

    /// Decode one datatype record, leaving the cursor just past it.
    /// Variable-length types recurse into their base type.
    pub(crate) fn decode_from(cur: &mut &[u8]) -> Result<Self> {
        let truncated =
            |_| Error::corrupt_message(MESSAGE_TYPE, "truncated datatype message");

        let class_and_version = cur.read_u8().map_err(truncated)?;
        let version = class_and_version >> 4;
        let class = class_and_version & 0xf;
        if !(1..=3).contains(&version) {
            return Err(Error::UnsupportedVersion {
                what: "datatype message",
                version,
            });
        }
        let bits0 = cur.read_u8().map_err(truncated)?;
        let _bits8 = cur.read_u8().map_err(truncated)?;
        let _bits16 = cur.read_u8().map_err(truncated)?;
        let size = cur.read_u32::<LittleEndian>().map_err(truncated)?;

        match class {
            0 => {
                let _bit_offset = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let _precision = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                Ok(Datatype::FixedPoint {
                    size,
                    signed: bits0 & 0x8 != 0,
                    byte_order: byte_order(bits0),
                })
            }
            1 => {
                let _bit_offset = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let _precision = cur.read_u16::<LittleEndian>().map_err(truncated)?;
                let _exp_location = cur.read_u8().map_err(truncated)?;
                let _exp_size = cur.read_u8().map_err(truncated)?;
                let _mantissa_location = cur.read_u8().map_err(truncated)?;
                let _mantissa_size = cur.read_u8().map_err(truncated)?;
                let _exp_bias = cur.read_u32::<LittleEndian>().map_err(truncated)?;
                Ok(Datatype::FloatingPoint {
                    size,
                    byte_order: byte_order(bits0),
                })
            }
            3 => Ok(Datatype::String {
                size,
                padding: match bits0 & 0xf {
                    0 => StringPadding::NullTerminate,
                    1 => StringPadding::NullPad,
                    2 => StringPadding::SpacePad,
                    p => {
                        return Err(Error::UnsupportedDatatype(format!(
                            "string padding {p}"
                        )))
                    }
                },
            }),
            9 => {
                let base = Datatype::decode_from(cur)?;
                Ok(Datatype::VariableLength {
                    size,
                    base: Box::new(base),
                    is_string: bits0 & 0xf == 1,
                })
            }
            c => Err(Error::UnsupportedDatatype(format!("class {c}"))),
        }
    }

    /// On-disk size of one element in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::String { size, .. }
            | Datatype::VariableLength { size, .. } => *size,
        }
    }
}

fn byte_order(bits0: u8) -> ByteOrder {
    if bits0 & 0x1 != 0 {
        ByteOrder::BigEndian
    } else {
        ByteOrder::LittleEndian
    }
}
