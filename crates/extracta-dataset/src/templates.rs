//! Built-in schema templates for common document types, used when no dataset
//! entry matches an uploaded file.

use crate::Schema;

/// A named, ready-to-use label/schema pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub label: String,
    pub schema: Schema,
}

/// The built-in templates, in presentation order.
pub fn default_templates() -> Vec<Template> {
    vec![
        Template {
            label: "carteira_oab".to_string(),
            schema: schema(&[
                ("nome", "Professional name, usually in the top-left corner of the image"),
                ("inscricao", "Professional registration number"),
                ("seccional", "Professional section"),
                ("subsecao", "Sub-section the professional belongs to"),
                (
                    "categoria",
                    "Category, can be ADVOGADO, ADVOGADA, SUPLEMENTAR, ESTAGIARIO, ESTAGIARIA",
                ),
                ("endereco_profissional", "Professional address"),
                ("telefone_profissional", "Professional phone number"),
                ("situacao", "Professional status, usually in the bottom-right corner"),
            ]),
        },
        Template {
            label: "tela_sistema".to_string(),
            schema: schema(&[
                ("data_base", "Base date of the selected operation"),
                ("data_vencimento", "Due date of the selected operation"),
                ("quantidade_parcelas", "Number of installments of the selected operation"),
                ("produto", "Product of the selected operation"),
                ("sistema", "System of the selected operation"),
                ("tipo_de_operacao", "Operation type"),
                ("tipo_de_sistema", "System type"),
            ]),
        },
    ]
}

/// Look up a built-in template by its label.
pub fn template_by_label(label: &str) -> Option<Template> {
    default_templates().into_iter().find(|t| t.label == label)
}

fn schema(fields: &[(&str, &str)]) -> Schema {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
