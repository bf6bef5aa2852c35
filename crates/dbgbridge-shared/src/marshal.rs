//! Argument marshaling across the native/managed boundary.
//!
//! Host commands arrive as one raw text string. Before a managed call the
//! text is copied into boundary-owned representations (a string array and
//! single strings). Those copies live exactly as long as the call frame that
//! built them: dropping the value frees the array and every element in it,
//! including on early returns.

use crate::{ErrorKind, Result, Status};
use widestring::U16String;

/// A boundary array of strings.
///
/// Implementations own their elements: `put` stores a fresh copy and dropping
/// the array releases every copy.
pub trait BoundaryArray: Sized {
    /// Allocate an array with `len` empty slots.
    fn allocate(len: usize) -> Result<Self>;

    /// Store a boundary-owned copy of `text` at `index`, replacing any previous element.
    fn put(&mut self, index: usize, text: &str) -> Result<()>;

    /// Read the element at `index` back into native text.
    fn get(&self, index: usize) -> Result<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single boundary string.
pub trait BoundaryString: Sized {
    fn from_text(text: &str) -> Result<Self>;

    fn to_text(&self) -> String;
}

/// Pack `strings` into a self-contained boundary array.
pub fn pack<A: BoundaryArray, S: AsRef<str>>(strings: &[S]) -> Result<A> {
    let mut array = A::allocate(strings.len())?;
    for (index, text) in strings.iter().enumerate() {
        array.put(index, text.as_ref())?;
    }
    Ok(array)
}

/// Wrap one string for single-argument calls.
pub fn pack_single<B: BoundaryString>(text: &str) -> Result<B> {
    B::from_text(text)
}

/// Read every element of a boundary array back, in order.
pub fn unpack<A: BoundaryArray>(array: &A) -> Result<Vec<String>> {
    (0..array.len()).map(|index| array.get(index)).collect()
}

fn out_of_range(index: usize, len: usize) -> crate::Error {
    ErrorKind::Invocation.failure(
        Status::E_INVALIDARG,
        format!("boundary array index {} (length {})", index, len),
    )
}

/// In-memory boundary array holding UTF-16 copies, the layout the runtime uses for strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideArray {
    slots: Vec<Option<U16String>>,
}

impl BoundaryArray for WideArray {
    fn allocate(len: usize) -> Result<Self> {
        Ok(Self {
            slots: vec![None; len],
        })
    }

    fn put(&mut self, index: usize, text: &str) -> Result<()> {
        let len = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
        *slot = Some(U16String::from_str(text));
        Ok(())
    }

    fn get(&self, index: usize) -> Result<String> {
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| out_of_range(index, self.slots.len()))?;
        // Unset slots read back as null strings, which the runtime treats as empty.
        Ok(slot
            .as_ref()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// In-memory single boundary string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideText(U16String);

impl BoundaryString for WideText {
    fn from_text(text: &str) -> Result<Self> {
        Ok(Self(U16String::from_str(text)))
    }

    fn to_text(&self) -> String {
        self.0.to_string_lossy()
    }
}

/// Split raw host argument text on single spaces.
///
/// Consecutive spaces produce empty arguments and empty text produces a single
/// empty argument, matching how the managed extension splits the same text.
pub fn split_arguments(text: &str) -> Vec<String> {
    text.split(' ').map(str::to_string).collect()
}

/// A script path followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub script: String,
    pub args: Vec<String>,
}

impl ScriptInvocation {
    /// First token is the script, the rest are passed to it.
    pub fn parse(text: &str) -> Self {
        let mut tokens = split_arguments(text).into_iter();
        let script = tokens.next().unwrap_or_default();
        Self {
            script,
            args: tokens.collect(),
        }
    }
}

/// Modal flag of the `openui` command: first token as a case-insensitive boolean.
pub fn parse_modal_flag(text: &str) -> bool {
    split_arguments(text)
        .first()
        .map(|token| token.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(strings: &[&str]) -> Vec<String> {
        let array: WideArray = pack(strings).expect("pack");
        assert_eq!(array.len(), strings.len());
        unpack(&array).expect("unpack")
    }

    #[test]
    fn empty_argument_list_round_trips() {
        assert!(round_trip(&[]).is_empty());
    }

    #[test]
    fn single_argument_round_trips() {
        assert_eq!(round_trip(&["script.csx"]), vec!["script.csx"]);
    }

    #[test]
    fn many_arguments_keep_order_and_empties() {
        let input = ["a", "", "ünïcødé", "with space", "", "last"];
        assert_eq!(round_trip(&input), input);
    }

    #[test]
    fn packed_array_does_not_borrow_the_source() {
        let source = vec![String::from("one"), String::from("two")];
        let array: WideArray = pack(&source).unwrap();
        drop(source);
        assert_eq!(unpack(&array).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn put_out_of_range_is_an_invocation_error() {
        let mut array = WideArray::allocate(1).unwrap();
        let err = array.put(1, "x").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Invocation));
        assert_eq!(err.status(), Status::E_INVALIDARG);
        assert!(array.get(3).is_err());
    }

    #[test]
    fn single_string_round_trips() {
        let text: WideText = pack_single("Console.WriteLine(1);").unwrap();
        assert_eq!(text.to_text(), "Console.WriteLine(1);");
    }

    #[test]
    fn splits_on_single_spaces() {
        assert_eq!(split_arguments("a b"), vec!["a", "b"]);
        assert_eq!(split_arguments("a  b"), vec!["a", "", "b"]);
        assert_eq!(split_arguments(""), vec![""]);
    }

    #[test]
    fn script_invocation_takes_first_token_as_path() {
        let parsed = ScriptInvocation::parse("myscript.csx 1 two");
        assert_eq!(parsed.script, "myscript.csx");
        assert_eq!(parsed.args, vec!["1", "two"]);

        let bare = ScriptInvocation::parse("myscript.csx");
        assert!(bare.args.is_empty());
    }

    #[test]
    fn modal_flag_parsing() {
        assert!(parse_modal_flag("true"));
        assert!(parse_modal_flag("TRUE extra"));
        assert!(!parse_modal_flag("false"));
        assert!(!parse_modal_flag("yes"));
        assert!(!parse_modal_flag(""));
    }
}
