//! # Filler
//! Anything that fills one or more variables a template renders with.
//!
//! A [ChatHistory](crate::chat::ChatHistory), for example, fills `messages`, so a chat template can
//! `{{#each messages}}` over the conversation.

use crate::function::Variables;
use anyhow::Result;

pub trait FillVariables {
    fn variables_to_fill(&self) -> &Vec<String>;
}

pub trait Fill: FillVariables {
    fn fill(&self, variables: &mut Variables) -> Result<()>;
}

pub trait FillMut: FillVariables {
    fn fill_mut(&mut self, variables: &mut Variables) -> Result<()>;
}

pub trait FillWith<CTX>: FillVariables {
    fn fill_with(&self, variables: &mut Variables, context: CTX) -> Result<CTX>;
}

pub trait FillWithMut<CTX>: FillVariables {
    fn fill_with_mut(&mut self, variables: &mut Variables, context: CTX) -> Result<CTX>;
}

impl<T: FillWith<()>> Fill for T {
    fn fill(&self, variables: &mut Variables) -> Result<()> {
        self.fill_with(variables, ())
    }
}

impl<T: FillWithMut<()>> FillMut for T {
    fn fill_mut(&mut self, variables: &mut Variables) -> Result<()> {
        self.fill_with_mut(variables, ())
    }
}
