// src/schema/dictionary.rs
use crate::process::Table;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::debug;

/// Raw column codes of the two published documents and their descriptive names.
///
/// Assumed, not enforced: no descriptive name is itself a raw code, which is what makes
/// [`FieldDictionary::normalize`] idempotent.
static FIELD_NAMES: &[(&str, &str)] = &[
    // ─── commercial conditions ───────────────────────────────────────
    ("COM", "Comercializador"),
    ("COD_Proposta", "Código da oferta comercial"),
    ("NomeProposta", "Nome da oferta comercial"),
    ("Segmento", "Segmento de clientes"),
    ("Fornecimento", "Tipo de fornecimento"),
    ("Dtini", "Data de início da oferta"),
    ("Dtfim", "Data de fim da oferta"),
    ("Vigencia", "Período de vigência"),
    ("TipoPreco", "Tipo de preço"),
    ("FiltroPrecosIndex", "Preços indexados"),
    ("FiltroFidelizacao", "Período de fidelização"),
    ("FiltroTarifaSocial", "Tarifa social"),
    ("FiltroRestricoes", "Restrições de acesso"),
    ("FiltroEnergiaVerde", "Energia verde"),
    ("FiltroDualFuel", "Oferta dual"),
    ("FaturaEletronica", "Fatura eletrónica"),
    ("DebitoDireto", "Débito direto"),
    ("ModoPagamento", "Modos de pagamento"),
    ("ModoFaturacao", "Periodicidade de faturação"),
    ("CanaisContratacao", "Canais de contratação"),
    ("CanaisAtendimento", "Canais de atendimento"),
    ("ServicosAdicionais", "Serviços adicionais"),
    ("CustoServicosAdicionais", "Custo dos serviços adicionais (€/mês)"),
    ("Condicoes", "Condições gerais"),
    ("LinkCondicoes", "Ligação para condições"),
    ("LinkFichaPadronizada", "Ficha contratual padronizada"),
    ("Observacoes", "Observações"),
    ("Desconto", "Desconto (%)"),
    ("DescontoTF", "Desconto no termo fixo (%)"),
    ("DescontoTV", "Desconto no termo de energia (%)"),
    ("DescontoBoasVindas", "Desconto de boas-vindas (€)"),
    ("PeriodoDesconto", "Duração do desconto (meses)"),
    ("ValidadeDesconto", "Validade do desconto"),
    ("Penalizacao", "Penalização por rescisão (€)"),
    ("Caucao", "Caução (€)"),
    ("Contacto", "Contacto do comercializador"),
    ("Website", "Sítio do comercializador"),
    ("Telefone", "Telefone de apoio"),
    ("Email", "Correio eletrónico"),
    ("Ambito", "Âmbito geográfico"),
    ("Mercado", "Tipo de mercado"),
    ("Renovavel", "Origem renovável (%)"),
    ("EmissoesCO2", "Emissões de CO2 (g/kWh)"),
    ("Residuos", "Resíduos radioativos (µg/kWh)"),
    ("ValidadeProposta", "Validade da proposta"),
    ("DataAtualizacao", "Data de atualização"),
    ("IndexanteTV", "Indexante do termo de energia"),
    ("FormulaIndexacao", "Fórmula de indexação"),
    ("MargemComercial", "Margem comercial (€/MWh)"),
    ("TaxaFixa", "Taxa de gestão (€/mês)"),
    // ─── prices ──────────────────────────────────────────────────────
    ("Pot_Cont", "Potência contratada"),
    ("Contagem", "Ciclo de contagem"),
    ("Opcao", "Opção horária"),
    ("Escalao", "Escalão de consumo"),
    ("DtiniPreco", "Data de início dos preços"),
    ("TF", "Termo fixo (€/dia)"),
    ("TV", "Termo de energia (€/kWh)"),
    ("TVFV", "Termo de energia fora de vazio (€/kWh)"),
    ("TVV", "Termo de energia vazio (€/kWh)"),
    ("TVVz", "Termo de energia super vazio (€/kWh)"),
    ("TVP", "Termo de energia ponta (€/kWh)"),
    ("TVC", "Termo de energia cheias (€/kWh)"),
    ("TFGN", "Termo fixo gás natural (€/dia)"),
    ("TVGN", "Termo de energia gás natural (€/kWh)"),
    ("TF_Desc", "Termo fixo com desconto (€/dia)"),
    ("TV_Desc", "Termo de energia com desconto (€/kWh)"),
    ("TVFV_Desc", "Termo de energia fora de vazio com desconto (€/kWh)"),
    ("TVV_Desc", "Termo de energia vazio com desconto (€/kWh)"),
    ("TVP_Desc", "Termo de energia ponta com desconto (€/kWh)"),
    ("TVC_Desc", "Termo de energia cheias com desconto (€/kWh)"),
    ("TFsIVA", "Termo fixo sem IVA (€/dia)"),
    ("TVsIVA", "Termo de energia sem IVA (€/kWh)"),
    ("TAR_TF", "Tarifa de acesso às redes, termo fixo (€/dia)"),
    ("TAR_TV", "Tarifa de acesso às redes, termo de energia (€/kWh)"),
    ("CAV", "Contribuição audiovisual (€/mês)"),
    ("IEC", "Imposto especial de consumo (€/kWh)"),
    ("TxDGEG", "Taxa de exploração DGEG (€/mês)"),
    ("IVA_TF", "IVA do termo fixo (%)"),
    ("IVA_TV", "IVA do termo de energia (%)"),
    ("PrecoMedio", "Preço médio estimado (€/kWh)"),
    ("CustoAnual", "Custo anual estimado (€)"),
    ("ConsumoRef", "Consumo de referência (kWh/ano)"),
];

static DEFAULT_DICTIONARY: Lazy<FieldDictionary> =
    Lazy::new(|| FieldDictionary::from_pairs(FIELD_NAMES.iter().copied()));

/// Immutable raw code → descriptive name mapping.
#[derive(Debug, Clone, Default)]
pub struct FieldDictionary {
    names: HashMap<String, String>,
}

impl FieldDictionary {
    /// The built-in dictionary of the regulator's column codes.
    pub fn standard() -> &'static FieldDictionary {
        &DEFAULT_DICTIONARY
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            names: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn describe(&self, code: &str) -> Option<&str> {
        self.names.get(code).map(String::as_str)
    }

    /// A copy of `table` with every known column code replaced by its descriptive name.
    /// Unknown columns and column order are kept as they are.
    pub fn normalize(&self, table: &Table) -> Table {
        let mut renamed = 0usize;
        let headers = table
            .headers
            .iter()
            .map(|h| match self.describe(h) {
                Some(name) => {
                    renamed += 1;
                    name.to_string()
                }
                None => h.clone(),
            })
            .collect();
        debug!(renamed, columns = table.num_columns(), "normalized column names");
        Table::new(headers, table.rows.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> Table {
        Table::new(
            vec!["COM".into(), "COD_Proposta".into(), "Extra".into(), "TF".into()],
            vec![vec![
                Some("G9".into()),
                Some("ABC1".into()),
                None,
                Some("0,3".into()),
            ]],
        )
    }

    #[test]
    fn renames_known_codes_in_place() {
        let out = FieldDictionary::standard().normalize(&raw());
        assert_eq!(
            out.headers,
            vec![
                "Comercializador",
                "Código da oferta comercial",
                "Extra",
                "Termo fixo (€/dia)"
            ]
        );
        assert_eq!(out.rows, raw().rows);
    }

    #[test]
    fn normalizing_twice_is_the_same_as_once() {
        let dict = FieldDictionary::standard();
        let once = dict.normalize(&raw());
        assert_eq!(dict.normalize(&once), once);
    }

    #[test]
    fn descriptive_names_are_never_codes() {
        let dict = FieldDictionary::standard();
        assert!(dict.len() >= 80);
        for (_, name) in FIELD_NAMES {
            assert!(dict.describe(name).is_none(), "{name} is also a code");
        }
    }
}
