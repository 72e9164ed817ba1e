//! The prompt asking a model for a plan. It is an ordinary template rendered with
//! `functions`, `goal`, `last_plan` and `last_error`.

pub const PLANNER_PROMPT: &str = r##"{{#message role="system"}}## Instructions
Explain how to achieve the user's goal with the available helpers in a Handlebars template.

## Example
If the goal was to solve the math problem "If I started with $120 in the stock market, how much would I have after 10 years if the growth rate was 5%?", the template could be:

```handlebars
{{{{raw}}}}{{!-- Step 1: initialize the variables --}}
{{set name="principal" value=120}}
{{set name="growth" value=(Math_Add 1 0.05)}}
{{set name="total" value=principal}}

{{!-- Step 2: grow the principal one year at a time --}}
{{#each (array 1 2 3 4 5 6 7 8 9 10)}}
  {{set name="total" value=(Math_Multiply total growth)}}
{{/each}}

{{!-- Step 3: output the answer --}}
{{concat "After 10 years you would have $" total}}{{{{/raw}}}}
```

## Built-in helpers
- `{{{{raw}}}}{{#if condition}}...{{else}}...{{/if}}{{{{/raw}}}}` and `{{{{raw}}}}{{#unless condition}}...{{/unless}}{{{{/raw}}}}` for conditions
- `{{{{raw}}}}{{#each list}}{{this}} {{@index}}{{/each}}{{{{/raw}}}}` to loop over a list
- `{{{{raw}}}}{{set name="variable" value=...}}{{{{/raw}}}}` to store a value and `{{{{raw}}}}{{get "variable"}}{{{{/raw}}}}` or `{{{{raw}}}}{{variable}}{{{{/raw}}}}` to read it
- `{{{{raw}}}}{{json value}}{{{{/raw}}}}` to write a value as JSON
- `{{{{raw}}}}{{concat a b ...}}{{{{/raw}}}}` to join values into a string
- `{{{{raw}}}}{{array a b ...}}{{{{/raw}}}}` to build a list
- `{{{{raw}}}}{{equals a b}}{{{{/raw}}}}`, `{{{{raw}}}}{{lessThan a b}}{{{{/raw}}}}`, `{{{{raw}}}}{{greaterThan a b}}{{{{/raw}}}}`, `{{{{raw}}}}{{lessThanOrEqual a b}}{{{{/raw}}}}`, `{{{{raw}}}}{{greaterThanOrEqual a b}}{{{{/raw}}}}` to compare values
- `{{{{raw}}}}{{not a}}{{{{/raw}}}}`, `{{{{raw}}}}{{and a b}}{{{{/raw}}}}`, `{{{{raw}}}}{{or a b}}{{{{/raw}}}}` to combine conditions

## Custom helpers
Arguments are passed by position in the order listed, or by name as `name=value`.
{{#each functions}}
### `{{signature}}`
Description: {{description}}
Inputs:
{{#each parameters}}
  - {{name}}: {{type}}{{#if description}} - {{description}}{{/if}}{{#if is_required}} (required){{else}} (optional){{/if}}
{{/each}}
Output: {{#if output_description}}{{output_description}}{{else}}string{{/if}}
{{/each}}

## Rules
- Only use the helpers listed above. Never invent a helper.
- Use `set` to keep intermediate results; do not guess values you can compute.
- If the goal cannot be achieved with these helpers, write a template that explains why.
- Answer with the template only, inside a ```handlebars block.{{/message}}
{{#message role="user"}}{{goal}}{{/message}}
{{#if last_plan}}
{{#message role="assistant"}}```handlebars
{{last_plan}}
```{{/message}}
{{#message role="user"}}Running this template failed with the following error:
{{last_error}}

Write a new template that avoids this error.{{/message}}
{{/if}}"##;
