//! Scripts and token streams
//!
//! The front end is an external collaborator; the core only needs
//! scripts as a source of names and token indices. The tokenizer here is
//! a trivial whitespace splitter so that token streams carry real data.

use crate::heap::{Heap, Space};
use crate::object::string::Str;
use crate::object::ObjectBody;
use crate::object_store::ObjectStore;
use crate::value::ObjectRef;

/// How a script entered the isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    /// A library declaration.
    Library,
    /// An imported unit.
    Import,
    /// A plain source unit.
    Source,
    /// A url-canonicalization request from the embedder.
    CanonicalizeUrl,
}

/// Token kinds produced by the placeholder tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// An identifier-like chunk.
    Ident,
    /// A numeric chunk.
    Number,
    /// End of stream.
    Eos,
}

/// One token: kind plus optional literal.
#[derive(Debug, Clone, Copy)]
pub struct TokenDesc {
    /// Token kind.
    pub kind: TokenKind,
    /// Literal symbol, or null.
    pub literal: ObjectRef,
}

/// Body of a script object.
pub struct ScriptDesc {
    /// Source url symbol.
    pub url: ObjectRef,
    /// Source text.
    pub source: ObjectRef,
    /// Script kind.
    pub kind: ScriptKind,
    /// Token stream, or null until tokenized.
    pub token_stream: ObjectRef,
}

/// Script handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Script(pub ObjectRef);

impl Script {
    /// Allocate a script.
    pub fn new(
        heap: &mut Heap,
        store: &ObjectStore,
        url: ObjectRef,
        source: ObjectRef,
        kind: ScriptKind,
    ) -> Script {
        let r = heap.allocate(
            store.script_class,
            Space::Old,
            ObjectBody::Script(ScriptDesc {
                url,
                source,
                kind,
                token_stream: ObjectRef::NULL,
            }),
        );
        Script(r)
    }

    /// Borrow the descriptor.
    pub fn desc(self, heap: &Heap) -> &ScriptDesc {
        match &heap.get(self.0).body {
            ObjectBody::Script(d) => d,
            _ => panic!("not a script"),
        }
    }

    /// Populate the token stream by splitting the source on whitespace.
    /// Private names (leading underscore) are suffixed with
    /// `private_key` so they stay library-local.
    pub fn tokenize(self, heap: &mut Heap, store: &mut ObjectStore, private_key: &str) {
        let source = self.desc(heap).source;
        let text = if source.is_null() {
            String::new()
        } else {
            Str(source).to_string(heap)
        };
        let mut tokens = Vec::new();
        for word in text.split_whitespace() {
            let kind = if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                TokenKind::Number
            } else {
                TokenKind::Ident
            };
            let literal = if word.starts_with('_') {
                crate::symbols::new_symbol(heap, store, &format!("{word}{private_key}"))
            } else {
                crate::symbols::new_symbol(heap, store, word)
            };
            tokens.push(TokenDesc { kind, literal });
        }
        tokens.push(TokenDesc {
            kind: TokenKind::Eos,
            literal: ObjectRef::NULL,
        });
        let stream = heap.allocate(
            store.token_stream_class,
            Space::Old,
            ObjectBody::TokenStream { tokens },
        );
        match &mut heap.get_mut(self.0).body {
            ObjectBody::Script(d) => d.token_stream = stream,
            _ => panic!("not a script"),
        }
    }

    /// The token at `index` of the stream.
    pub fn token_at(self, heap: &Heap, index: usize) -> TokenDesc {
        let stream = self.desc(heap).token_stream;
        match &heap.get(stream).body {
            ObjectBody::TokenStream { tokens } => tokens[index],
            _ => panic!("script not tokenized"),
        }
    }

    /// Number of tokens including the end-of-stream marker.
    pub fn num_tokens(self, heap: &Heap) -> usize {
        let stream = self.desc(heap).token_stream;
        if stream.is_null() {
            return 0;
        }
        match &heap.get(stream).body {
            ObjectBody::TokenStream { tokens } => tokens.len(),
            _ => panic!("script not tokenized"),
        }
    }
}
