/// System prompts for the three kinds of completion request.
#[derive(Debug, Clone)]
pub struct SystemPrompts {
    pub queries: String,
    pub answer: String,
    pub summary: String,
}

impl Default for SystemPrompts {
    fn default() -> Self {
        Self {
            queries: QUERIES_SYSTEM.into(),
            answer: ANSWER_SYSTEM.into(),
            summary: SUMMARY_SYSTEM.into(),
        }
    }
}

pub fn query_generation_prompt(question: &str, count: usize) -> String {
    format!(
        "Para a pergunta '{question}', gere {count} queries de busca em português. \
         As queries devem estar em um formato JSON, como uma lista de strings na chave 'queries'. \
         Exemplo: {{\"queries\": [\"query 1\", \"query 2\"]}}"
    )
}

pub fn answer_prompt(question: &str, context: &str) -> String {
    format!("Pergunta: {question}\nContexto: {context}\nResponda de forma clara e objetiva.")
}

pub fn summary_prompt(context: &str, limit_chars: usize) -> String {
    format!(
        "Resuma o contexto abaixo em no máximo {limit_chars} caracteres. \
         Mantenha a estrutura: uma entrada por documento, preservando título, \
         link, autoridade, data e os pontos essenciais da ementa.\n\nContexto: {context}"
    )
}

const QUERIES_SYSTEM: &str = "\
Você é um especialista em pesquisa jurídica brasileira. Sua tarefa é gerar queries de busca \
precisas e eficazes para encontrar informações relevantes sobre legislação, jurisprudência e \
normas brasileiras.\n\
\n\
Diretrizes:\n\
- Use termos jurídicos específicos e precisos\n\
- Inclua sinônimos e variações terminológicas\n\
- Considere diferentes níveis de governo (federal, estadual, municipal)\n\
- Foque em aspectos práticos e procedimentais\n\
- Use linguagem formal e técnica apropriada";

const ANSWER_SYSTEM: &str = "\
Você é um assistente jurídico especializado em direito brasileiro. Sua função é fornecer \
respostas claras, precisas e bem fundamentadas sobre questões legais, baseando-se \
exclusivamente no contexto fornecido.\n\
\n\
Diretrizes:\n\
- Base suas respostas APENAS no contexto fornecido\n\
- Cite as fontes legais quando disponíveis (leis, decretos, etc.)\n\
- Use linguagem clara e acessível, mas tecnicamente precisa\n\
- Estruture a resposta de forma lógica e organizada\n\
- Se o contexto for insuficiente, indique claramente essa limitação\n\
- Não invente informações que não estejam no contexto";

const SUMMARY_SYSTEM: &str = "\
Você condensa resultados de pesquisa jurídica sem inventar conteúdo. \
Preserve referências normativas, números de leis e links exatamente como aparecem.";
