//! PI Dependency Expression (DEPEX) support
//!
//! A DEPEX is a postfix bytecode evaluated against the set of installed PPIs or protocols. This crate parses the
//! bytecode into [`Opcode`]s once and evaluates it as often as the dispatcher asks. Evaluation is a pure function of
//! the expression and the installed set.
//!
//! `BEFORE` and `AFTER` expressions do not depend on the installed set; they evaluate `True` and expose their
//! constraint through [`Depex::ordering`] so the dispatcher can place the file next to its target. A `SOR`
//! expression evaluates `False` until [`Depex::schedule`] is called.
//!
//! ## Logging
//!
//! Evaluation traces are emitted on the `pi_depex` log target.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{collections::BTreeSet, vec::Vec};
use core::fmt;
use pi_sdk::{error::EfiError, OrdGuid};
use r_efi::efi;
use uuid::Uuid;

/// The size of a GUID in bytes
const GUID_SIZE: usize = 16;

/// Initial capacity of the evaluation stack.
const DEPEX_STACK_SIZE_INCREMENT: usize = 0x20;

pub mod opcode {
    pub const BEFORE: u8 = 0x00;
    pub const AFTER: u8 = 0x01;
    pub const PUSH: u8 = 0x02;
    pub const AND: u8 = 0x03;
    pub const OR: u8 = 0x04;
    pub const NOT: u8 = 0x05;
    pub const TRUE: u8 = 0x06;
    pub const FALSE: u8 = 0x07;
    pub const END: u8 = 0x08;
    pub const SOR: u8 = 0x09;
}

/// A DEPEX opcode
#[derive(Debug, Clone, PartialEq)]
pub enum Opcode {
    /// If present, this must be the first and only opcode before `End`.
    Before(Uuid),
    /// If present, this must be the first and only opcode before `End`.
    After(Uuid),
    /// Pushes whether the GUID is installed.
    Push(Uuid),
    And,
    Or,
    Not,
    True,
    False,
    /// The last opcode of the expression.
    End,
    /// If present, this must be the first opcode. Schedule on request.
    Sor,
    /// An unrecognized opcode byte.
    Unknown(u8),
    /// A GUID-carrying opcode with too few payload bytes.
    Malformed {
        /// The opcode value.
        opcode: u8,
        /// The payload bytes that were available.
        len: usize,
    },
}

fn uuid_from_slice(slice: Option<&[u8]>) -> Option<Uuid> {
    Uuid::from_slice_le(slice?).ok()
}

fn guid_from_uuid(uuid: &Uuid) -> efi::Guid {
    efi::Guid::from_bytes(&uuid.to_bytes_le())
}

impl<'a> From<&'a [u8]> for Opcode {
    /// Decodes the opcode at the front of a non-empty byte slice.
    fn from(bytes: &'a [u8]) -> Self {
        let Some(&code) = bytes.first() else {
            return Opcode::Malformed { opcode: opcode::END, len: 0 };
        };
        let guid_operand = || uuid_from_slice(bytes.get(1..GUID_SIZE + 1));
        let malformed = Opcode::Malformed { opcode: code, len: bytes.len() - 1 };
        match code {
            opcode::BEFORE => guid_operand().map_or(malformed, Opcode::Before),
            opcode::AFTER => guid_operand().map_or(malformed, Opcode::After),
            opcode::PUSH => guid_operand().map_or(malformed, Opcode::Push),
            opcode::AND => Opcode::And,
            opcode::OR => Opcode::Or,
            opcode::NOT => Opcode::Not,
            opcode::TRUE => Opcode::True,
            opcode::FALSE => Opcode::False,
            opcode::END => Opcode::End,
            opcode::SOR => Opcode::Sor,
            other => Opcode::Unknown(other),
        }
    }
}

impl Opcode {
    fn byte_size(&self) -> usize {
        match self {
            Opcode::Before(_) | Opcode::After(_) | Opcode::Push(_) => 1 + GUID_SIZE,
            Opcode::Malformed { len, .. } => 1 + len,
            _ => 1,
        }
    }
}

/// An ordering constraint placing a file relative to another file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociatedDependency {
    /// The file must be dispatched immediately before the named file.
    Before(efi::Guid),
    /// The file must be dispatched immediately after the named file.
    After(efi::Guid),
}

impl AssociatedDependency {
    pub fn target(&self) -> efi::Guid {
        match self {
            AssociatedDependency::Before(guid) | AssociatedDependency::After(guid) => *guid,
        }
    }
}

/// Why an expression can never be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepexError {
    /// The expression is empty.
    Empty,
    /// The opcode stream ended without `END`.
    MissingEnd,
    /// An operator found fewer operands than it needs.
    StackUnderflow,
    /// `END` was reached with more than one value on the stack.
    StackImbalance,
    /// An unrecognized opcode.
    UnknownOpcode(u8),
    /// A GUID-carrying opcode without a complete GUID.
    MalformedOpcode { opcode: u8, len: usize },
    /// `BEFORE`/`AFTER` combined with anything but `END`.
    BeforeAfterNotAlone,
    /// `SOR` anywhere but the first opcode.
    SorNotFirst,
}

impl fmt::Display for DepexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepexError::UnknownOpcode(code) => write!(f, "unknown opcode {code:#04x}"),
            DepexError::MalformedOpcode { opcode, len } => {
                write!(f, "opcode {opcode:#04x} expects a GUID, only has {len} bytes")
            }
            other => fmt::Debug::fmt(other, f),
        }
    }
}

impl From<DepexError> for EfiError {
    fn from(_: DepexError) -> Self {
        EfiError::InvalidParameter
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepexResult {
    True,
    False,
    /// The expression is malformed and never dispatchable.
    Error(DepexError),
}

impl From<bool> for DepexResult {
    fn from(value: bool) -> Self {
        if value { DepexResult::True } else { DepexResult::False }
    }
}

/// The set of installed interface GUIDs an expression is evaluated against.
pub trait GuidSet {
    fn contains_guid(&self, guid: &efi::Guid) -> bool;
}

impl GuidSet for [efi::Guid] {
    fn contains_guid(&self, guid: &efi::Guid) -> bool {
        self.contains(guid)
    }
}

impl GuidSet for Vec<efi::Guid> {
    fn contains_guid(&self, guid: &efi::Guid) -> bool {
        self.as_slice().contains_guid(guid)
    }
}

impl GuidSet for BTreeSet<OrdGuid> {
    fn contains_guid(&self, guid: &efi::Guid) -> bool {
        self.contains(&OrdGuid(*guid))
    }
}

/// A parsed dependency expression
#[derive(Debug, Clone)]
pub struct Depex {
    expression: Vec<Opcode>,
}

impl From<&[u8]> for Depex {
    fn from(value: &[u8]) -> Self {
        Self::parse(value)
    }
}

impl From<Vec<u8>> for Depex {
    fn from(value: Vec<u8>) -> Self {
        Self::parse(&value)
    }
}

impl From<&[Opcode]> for Depex {
    fn from(value: &[Opcode]) -> Self {
        Self { expression: value.to_vec() }
    }
}

impl Depex {
    /// Decode the bytecode. Decoding never fails; bad bytes become [`Opcode::Unknown`] or [`Opcode::Malformed`] and
    /// surface as errors on evaluation.
    pub fn parse(bytes: &[u8]) -> Self {
        Self { expression: DepexParser::new(bytes).collect() }
    }

    /// The decoded opcodes.
    pub fn opcodes(&self) -> &[Opcode] {
        &self.expression
    }

    /// Evaluate the expression against `installed`.
    pub fn evaluate(&self, installed: &(impl GuidSet + ?Sized)) -> DepexResult {
        match self.evaluate_inner(installed) {
            Ok(value) => {
                log::trace!(target: "pi_depex", "depex => {value:?}");
                value
            }
            Err(err) => {
                log::error!(target: "pi_depex", "malformed depex {:x?}: {}", self.expression, err);
                DepexResult::Error(err)
            }
        }
    }

    fn evaluate_inner(&self, installed: &(impl GuidSet + ?Sized)) -> Result<DepexResult, DepexError> {
        if self.expression.is_empty() {
            return Err(DepexError::Empty);
        }

        let mut stack: Vec<bool> = Vec::with_capacity(DEPEX_STACK_SIZE_INCREMENT);
        for (index, opcode) in self.expression.iter().enumerate() {
            match opcode {
                Opcode::Before(_) | Opcode::After(_) => {
                    if index != 0 || self.expression.len() > 2 {
                        return Err(DepexError::BeforeAfterNotAlone);
                    }
                    return match self.expression.get(1) {
                        Some(Opcode::End) => Ok(DepexResult::True),
                        Some(_) => Err(DepexError::BeforeAfterNotAlone),
                        None => Err(DepexError::MissingEnd),
                    };
                }
                Opcode::Sor => {
                    if index != 0 {
                        return Err(DepexError::SorNotFirst);
                    }
                    // Until scheduled the expression is not dispatchable; the rest must still be well formed.
                    return match self.evaluate_tail(&self.expression[1..], installed) {
                        Ok(_) => Ok(DepexResult::False),
                        Err(err) => Err(err),
                    };
                }
                _ => (),
            }
            if let Some(result) = step(opcode, &mut stack, installed)? {
                return Ok(result.into());
            }
        }
        Err(DepexError::MissingEnd)
    }

    fn evaluate_tail(&self, tail: &[Opcode], installed: &(impl GuidSet + ?Sized)) -> Result<bool, DepexError> {
        let mut stack: Vec<bool> = Vec::with_capacity(DEPEX_STACK_SIZE_INCREMENT);
        for opcode in tail {
            match opcode {
                Opcode::Before(_) | Opcode::After(_) => return Err(DepexError::BeforeAfterNotAlone),
                Opcode::Sor => return Err(DepexError::SorNotFirst),
                _ => (),
            }
            if let Some(result) = step(opcode, &mut stack, installed)? {
                return Ok(result);
            }
        }
        Err(DepexError::MissingEnd)
    }

    /// The `BEFORE`/`AFTER` constraint of this expression, if it is one.
    pub fn ordering(&self) -> Option<AssociatedDependency> {
        match self.expression.first() {
            Some(Opcode::Before(uuid)) => Some(AssociatedDependency::Before(guid_from_uuid(uuid))),
            Some(Opcode::After(uuid)) => Some(AssociatedDependency::After(guid_from_uuid(uuid))),
            _ => None,
        }
    }

    /// Whether this is a "schedule on request" expression that has not been scheduled yet.
    pub fn is_sor(&self) -> bool {
        self.expression.first() == Some(&Opcode::Sor)
    }

    /// Mark a SOR expression as scheduled so it evaluates normally. Does nothing for other expressions.
    pub fn schedule(&mut self) {
        if self.is_sor() {
            self.expression.remove(0);
        }
    }

    /// Every GUID the expression pushes. Used to report what an unsatisfied file is waiting for.
    pub fn referenced_guids(&self) -> impl Iterator<Item = efi::Guid> + '_ {
        self.expression.iter().filter_map(|opcode| match opcode {
            Opcode::Push(uuid) => Some(guid_from_uuid(uuid)),
            _ => None,
        })
    }
}

/// Apply one stack opcode. Returns the final value when `opcode` is `END`.
fn step(
    opcode: &Opcode,
    stack: &mut Vec<bool>,
    installed: &(impl GuidSet + ?Sized),
) -> Result<Option<bool>, DepexError> {
    let pop = |stack: &mut Vec<bool>| stack.pop().ok_or(DepexError::StackUnderflow);
    match opcode {
        Opcode::Push(uuid) => {
            let present = installed.contains_guid(&guid_from_uuid(uuid));
            stack.push(present);
            log::trace!(target: "pi_depex", "  PUSH {uuid} => {present}");
        }
        Opcode::And => {
            let (operand1, operand2) = (pop(stack)?, pop(stack)?);
            stack.push(operand1 && operand2);
        }
        Opcode::Or => {
            let (operand1, operand2) = (pop(stack)?, pop(stack)?);
            stack.push(operand1 || operand2);
        }
        Opcode::Not => {
            let operand = pop(stack)?;
            stack.push(!operand);
        }
        Opcode::True => stack.push(true),
        Opcode::False => stack.push(false),
        Opcode::End => {
            let result = pop(stack)?;
            if !stack.is_empty() {
                return Err(DepexError::StackImbalance);
            }
            return Ok(Some(result));
        }
        Opcode::Unknown(code) => return Err(DepexError::UnknownOpcode(*code)),
        Opcode::Malformed { opcode, len } => return Err(DepexError::MalformedOpcode { opcode: *opcode, len: *len }),
        Opcode::Before(_) | Opcode::After(_) | Opcode::Sor => (),
    }
    Ok(None)
}

struct DepexParser<'a> {
    expression: &'a [u8],
    index: usize,
}

impl<'a> DepexParser<'a> {
    fn new(expression: &'a [u8]) -> Self {
        Self { expression, index: 0 }
    }
}

impl Iterator for DepexParser<'_> {
    type Item = Opcode;

    fn next(&mut self) -> Option<Opcode> {
        if self.index >= self.expression.len() {
            return None;
        }

        let opcode = Opcode::from(&self.expression[self.index..]);
        self.index += opcode.byte_size();
        Some(opcode)
    }
}

/// Encode opcodes back into bytecode. Used to build expressions for firmware images and tests.
pub fn encode(opcodes: &[Opcode]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for op in opcodes {
        let (code, guid) = match op {
            Opcode::Before(uuid) => (opcode::BEFORE, Some(uuid)),
            Opcode::After(uuid) => (opcode::AFTER, Some(uuid)),
            Opcode::Push(uuid) => (opcode::PUSH, Some(uuid)),
            Opcode::And => (opcode::AND, None),
            Opcode::Or => (opcode::OR, None),
            Opcode::Not => (opcode::NOT, None),
            Opcode::True => (opcode::TRUE, None),
            Opcode::False => (opcode::FALSE, None),
            Opcode::End => (opcode::END, None),
            Opcode::Sor => (opcode::SOR, None),
            Opcode::Unknown(code) => (*code, None),
            Opcode::Malformed { opcode, .. } => (*opcode, None),
        };
        bytes.push(code);
        if let Some(uuid) = guid {
            bytes.extend_from_slice(&uuid.to_bytes_le());
        }
    }
    bytes
}

/// Build a PUSH opcode for an interface GUID.
pub fn push(guid: &efi::Guid) -> Opcode {
    Opcode::Push(Uuid::from_bytes_le(*guid.as_bytes()))
}

/// Build a BEFORE opcode naming a file.
pub fn before(guid: &efi::Guid) -> Opcode {
    Opcode::Before(Uuid::from_bytes_le(*guid.as_bytes()))
}

/// Build an AFTER opcode naming a file.
pub fn after(guid: &efi::Guid) -> Opcode {
    Opcode::After(Uuid::from_bytes_le(*guid.as_bytes()))
}
